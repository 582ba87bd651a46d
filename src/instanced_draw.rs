//! Instanced draws driven by data textures.
//!
//! An [`InstancedDraw`] binds one mesh, one program and a set of
//! [`InstanceDataTexture`]s, and records exactly one `draw_indexed` call per
//! frame however many instances it places.
//!
//! # Group 2 Bindings
//!
//! | Binding     | Contents                                        |
//! |-------------|-------------------------------------------------|
//! | 0           | instance uniforms (sizes, count, trace params)  |
//! | 1..=K       | the K data textures, `textureLoad` only         |
//! | K + 1       | optional sprite texture                         |
//! | K + 2       | the sprite's linear sampler                     |

use std::rc::Rc;

use glam::{Vec3, Vec4};
use tracing::{info, instrument, warn};
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::instancing::{InstanceDataTexture, InstancedLayout, TraceParams};
use crate::mesh::{Bounds, Mesh};
use crate::program::Program;
use crate::scene_pass::{self, SceneTarget};
use crate::texture::Texture;

/// How an instanced draw composites.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Blend {
    /// Replaces color and blur factor, writes depth.
    #[default]
    Opaque,
    /// Source-alpha blended over the color, depth tested but not written.
    Transparent,
}

/// Group 2, binding 0.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceUniforms {
    pub sizes: [f32; 2],
    pub total: f32,
    pub num_traces: f32,
    pub trace_interval: f32,
    pub trace_length: f32,
    pub _pad: [f32; 2],
}

impl InstanceUniforms {
    pub fn new(layout: &InstancedLayout, trace: &TraceParams) -> Self {
        let (w, h) = layout.sizes();
        Self {
            sizes: [w as f32, h as f32],
            total: layout.count() as f32,
            num_traces: trace.num_traces as f32,
            trace_interval: trace.interval,
            trace_length: trace.length,
            _pad: [0.0; 2],
        }
    }
}

/// The single draw an [`InstancedDraw`] records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCommand {
    pub index_count: u32,
    pub instance_count: u32,
}

/// Everything needed to build an [`InstancedDraw`].
pub struct InstancedDrawDesc<'a> {
    pub label: String,
    pub geometry: Rc<Mesh>,
    pub count: u32,
    pub textures: &'a [&'a InstanceDataTexture],
    pub program: Program,
    pub sprite: Option<&'a Texture>,
    pub color: Vec4,
    pub blend: Blend,
    pub trace: TraceParams,
}

impl<'a> InstancedDrawDesc<'a> {
    /// An opaque white draw without sprite or trace animation.
    pub fn new(
        label: impl Into<String>,
        geometry: Rc<Mesh>,
        count: u32,
        textures: &'a [&'a InstanceDataTexture],
        program: Program,
    ) -> Self {
        Self {
            label: label.into(),
            geometry,
            count,
            textures,
            program,
            sprite: None,
            color: Vec4::ONE,
            blend: Blend::Opaque,
            trace: TraceParams::default().with_traces(0),
        }
    }

    pub fn with_sprite(mut self, sprite: &'a Texture) -> Self {
        self.sprite = Some(sprite);
        self
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn with_blend(mut self, blend: Blend) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_trace(mut self, trace: TraceParams) -> Self {
        self.trace = trace;
        self
    }
}

struct TargetPipeline {
    target: SceneTarget,
    pipeline: Option<wgpu::RenderPipeline>,
}

pub struct InstancedDraw {
    label: String,
    geometry: Rc<Mesh>,
    layout: InstancedLayout,
    program: Program,
    color: Vec4,
    blend: Blend,
    trace: TraceParams,
    uniforms_dirty: bool,
    uniform_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    pipelines: Vec<TargetPipeline>,
    generation: u64,
    bounds: Option<Bounds>,
}

impl InstancedDraw {
    /// Validates the texture sizes against `count`, uploads the textures and
    /// builds the group-2 bind group. Pipelines are built later, per target,
    /// by the scene pass.
    ///
    /// # Errors
    ///
    /// * [`RenderError::Configuration`] unless every texture has exactly `count` cells
    /// * [`RenderError::Allocation`] if a texture exceeds the device limits
    #[instrument(skip_all, fields(draw = %desc.label, count = desc.count))]
    pub fn build(gpu: &GpuContext, desc: InstancedDrawDesc) -> RenderResult<Self> {
        let sizes: Vec<(u32, u32)> = desc
            .textures
            .iter()
            .map(|t| (t.width(), t.height()))
            .collect();
        let layout = InstancedLayout::new(desc.count, &sizes)?;

        let device = &gpu.device;
        let textures = desc
            .textures
            .iter()
            .enumerate()
            .map(|(i, t)| t.upload(gpu, &format!("{} Data {i}", desc.label)))
            .collect::<RenderResult<Vec<_>>>()?;
        let views: Vec<wgpu::TextureView> = textures
            .iter()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();

        let stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: stages,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for binding in 1..=views.len() as u32 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: stages,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        let sprite_binding = views.len() as u32 + 1;
        if desc.sprite.is_some() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: sprite_binding,
                visibility: stages,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: sprite_binding + 1,
                visibility: stages,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Instance Layout", desc.label)),
            entries: &entries,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Instance Uniforms", desc.label)),
            contents: bytemuck::bytes_of(&InstanceUniforms::new(&layout, &desc.trace)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let mut bind_entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for (i, view) in views.iter().enumerate() {
            bind_entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        if let Some(sprite) = desc.sprite {
            bind_entries.push(wgpu::BindGroupEntry {
                binding: sprite_binding,
                resource: wgpu::BindingResource::TextureView(&sprite.view),
            });
            bind_entries.push(wgpu::BindGroupEntry {
                binding: sprite_binding + 1,
                resource: wgpu::BindingResource::Sampler(&sprite.sampler),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Instance Bind Group", desc.label)),
            layout: &bind_group_layout,
            entries: &bind_entries,
        });

        let bounds = instance_bounds(desc.textures.first().copied(), desc.geometry.bounds());

        info!(
            draw = %desc.label,
            instances = layout.count(),
            vertices = layout.count() as u64 * desc.geometry.index_count() as u64,
            "instanced draw built"
        );

        Ok(Self {
            label: desc.label,
            geometry: desc.geometry,
            layout,
            program: desc.program,
            color: desc.color,
            blend: desc.blend,
            trace: desc.trace,
            uniforms_dirty: false,
            uniform_buffer,
            bind_group_layout,
            bind_group,
            pipelines: Vec::new(),
            generation: 0,
            bounds,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn count(&self) -> u32 {
        self.layout.count()
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn blend(&self) -> Blend {
        self.blend
    }

    pub fn trace(&self) -> TraceParams {
        self.trace
    }

    /// Takes effect at the next frame's update.
    pub fn set_trace(&mut self, trace: TraceParams) {
        self.trace = trace;
        self.uniforms_dirty = true;
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Local-space bounds: the data positions (first texture) padded by the mesh.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// The one draw recorded per frame.
    pub fn draw_command(&self) -> DrawCommand {
        DrawCommand {
            index_count: self.geometry.index_count(),
            instance_count: self.layout.count(),
        }
    }

    /// Builds (or rebuilds) the pipeline for one scene pass's target.
    pub(crate) fn prepare(&mut self, gpu: &GpuContext, target: &SceneTarget) {
        let pipeline = self.build_pipeline(gpu, target);
        match self.pipelines.iter_mut().find(|p| p.target.matches(target)) {
            Some(existing) => {
                existing.target = target.clone();
                existing.pipeline = pipeline;
            }
            None => self.pipelines.push(TargetPipeline {
                target: target.clone(),
                pipeline,
            }),
        }
        self.generation = self.program.generation();
    }

    fn build_pipeline(&self, gpu: &GpuContext, target: &SceneTarget) -> Option<wgpu::RenderPipeline> {
        self.program
            .effective()
            .ok_or_else(|| {
                RenderError::shader_compile(&self.label, "program has no valid or enabled source")
            })
            .and_then(|compiled| {
                scene_pass::scene_pipeline(
                    gpu,
                    &self.label,
                    compiled,
                    target,
                    Some(&self.bind_group_layout),
                    self.blend,
                )
            })
            .inspect_err(|err| warn!(draw = %self.label, error = %err, "instanced draw disabled"))
            .ok()
    }

    pub(crate) fn update(&mut self, gpu: &GpuContext) {
        if self.uniforms_dirty {
            gpu.queue.write_buffer(
                &self.uniform_buffer,
                0,
                bytemuck::bytes_of(&InstanceUniforms::new(&self.layout, &self.trace)),
            );
            self.uniforms_dirty = false;
        }
    }

    pub(crate) fn check_reload(&mut self, gpu: &GpuContext) {
        self.program.check_reload();
        if self.generation == self.program.generation() {
            return;
        }
        let targets: Vec<SceneTarget> = self.pipelines.iter().map(|p| p.target.clone()).collect();
        for target in targets {
            self.prepare(gpu, &target);
        }
        self.generation = self.program.generation();
    }

    /// Records the single instanced draw. Group 0 and 1 must already be bound.
    pub(crate) fn record(&self, pass: &mut wgpu::RenderPass, target: &SceneTarget) {
        let Some(pipeline) = self
            .pipelines
            .iter()
            .find(|p| p.target.matches(target))
            .and_then(|p| p.pipeline.as_ref())
        else {
            return;
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(2, &self.bind_group, &[]);
        self.geometry.draw(pass, 0..self.layout.count());
    }
}

fn instance_bounds(positions: Option<&InstanceDataTexture>, mesh: Option<Bounds>) -> Option<Bounds> {
    let data = Bounds::from_points(positions?.cells().iter().copied())?;
    let pad = mesh.map_or(0.0, |m| m.min.abs().max(m.max.abs()).max_element());
    Some(Bounds::new(data.min - Vec3::splat(pad), data.max + Vec3::splat(pad)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_uniforms_pad_to_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<InstanceUniforms>(), 32);
    }

    #[test]
    fn uniforms_carry_sizes_and_trace() {
        let layout = InstancedLayout::new(256, &[(256, 1)]).unwrap();
        let u = InstanceUniforms::new(&layout, &TraceParams::default());
        assert_eq!(u.sizes, [256.0, 1.0]);
        assert_eq!(u.total, 256.0);
        assert_eq!(u.num_traces, 5.0);
        assert_eq!(u.trace_length, 14.0);
    }

    #[test]
    fn bounds_pad_positions_by_mesh_extent() {
        let positions =
            InstanceDataTexture::from_cells(2, 1, vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)]).unwrap();
        let arrow = Bounds::new(Vec3::new(-0.1, -0.1, 0.0), Vec3::new(0.1, 0.1, 1.0));
        let b = instance_bounds(Some(&positions), Some(arrow)).unwrap();
        assert_eq!(b.min, Vec3::splat(-1.0));
        assert_eq!(b.max, Vec3::new(11.0, 1.0, 1.0));
        assert!(instance_bounds(None, Some(arrow)).is_none());
    }
}
