//! Lit scene rendering with depth testing.
//!
//! [`ScenePass`] draws a shared [`Scene`] into one target. Color goes to RGB
//! and the blur factor (distance from the focal plane over the focal range,
//! clamped to 0..1) goes to alpha, so later passes can blend between a sharp
//! and a blurred copy of the image.
//!
//! # Bind Groups
//!
//! - **Group 0**: frame uniforms (view, projection, focal plane, time)
//! - **Group 1**: object uniforms (model, normal matrix, color) at a dynamic offset
//! - **Group 2**: per instanced draw (see [`InstancedDraw`])
//!
//! Opaque geometry draws first. Alpha-blended instanced draws follow with
//! depth writes off, so sprites never hide each other.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec4};
use tracing::{debug, instrument, warn};

use crate::camera;
use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::instanced_draw::{Blend, InstancedDraw};
use crate::mesh::Vertex3d;
use crate::program::{self, CompiledProgram, Program};
use crate::render_graph::{FrameState, PrepareContext, RenderContext, RenderNode, TargetInfo};
use crate::scene::{DrawItem, DrawKind, Scene};
use crate::shaders;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Group 0 of every scene program.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub focal_dist: f32,
    pub focal_range: f32,
    pub time: f32,
    pub _pad: f32,
}

/// Group 1 of every scene program.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniforms {
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of `model`, for normals under non-uniform scale.
    pub normal_matrix: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl ObjectUniforms {
    pub fn new(model: Mat4, color: Vec4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal_matrix: model.inverse().transpose().to_cols_array_2d(),
            color: color.to_array(),
        }
    }
}

/// Perspective parameters; the aspect ratio comes from the target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: 50.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Projection {
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        camera::perspective(self.fov_y.to_radians(), aspect, self.near, self.far)
    }
}

/// Layouts and format an instanced draw needs to build a compatible pipeline.
#[derive(Clone, Debug)]
pub struct SceneTarget {
    pub format: wgpu::TextureFormat,
    pub frame_layout: wgpu::BindGroupLayout,
    pub object_layout: wgpu::BindGroupLayout,
}

impl SceneTarget {
    /// Same format and the same layout objects, so one pipeline serves both.
    pub fn matches(&self, other: &SceneTarget) -> bool {
        self.format == other.format
            && self.frame_layout == other.frame_layout
            && self.object_layout == other.object_layout
    }
}

struct SceneState {
    target: SceneTarget,
    output: TargetInfo,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    object_buffer: wgpu::Buffer,
    object_bind_group: wgpu::BindGroup,
    object_capacity: usize,
    object_stride: u64,
    depth_view: wgpu::TextureView,
    mesh_pipeline: Option<wgpu::RenderPipeline>,
    generation: u64,
}

/// Render node drawing a [`Scene`] with its own depth buffer.
pub struct ScenePass {
    label: String,
    scene: Rc<RefCell<Scene>>,
    program: Program,
    projection: Projection,
    state: Option<SceneState>,
    draws: Vec<DrawItem>,
}

impl ScenePass {
    pub fn new(label: impl Into<String>, scene: Rc<RefCell<Scene>>, projection: Projection) -> Self {
        let label = label.into();
        let program = Program::new(format!("{label} program"), shaders::SCENE_VS, shaders::SCENE_FS);
        Self::with_program(label, scene, projection, program)
    }

    pub fn with_program(
        label: impl Into<String>,
        scene: Rc<RefCell<Scene>>,
        projection: Projection,
        program: Program,
    ) -> Self {
        Self {
            label: label.into(),
            scene,
            program,
            projection,
            state: None,
            draws: Vec::new(),
        }
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Draw items captured by the last `update`.
    pub fn draws(&self) -> &[DrawItem] {
        &self.draws
    }

    fn rebuild_mesh_pipeline(&mut self, gpu: &GpuContext) {
        let Some(state) = &mut self.state else {
            return;
        };
        let attempt = self
            .program
            .effective()
            .ok_or_else(|| {
                RenderError::shader_compile(&self.label, "program has no valid or enabled source")
            })
            .and_then(|compiled| {
                scene_pipeline(
                    gpu,
                    &self.label,
                    compiled,
                    &state.target,
                    None,
                    Blend::Opaque,
                )
            });
        state.mesh_pipeline = attempt
            .inspect_err(|err| warn!(pass = %self.label, error = %err, "meshes disabled"))
            .ok();
        state.generation = self.program.generation();
    }

    fn ensure_object_capacity(&mut self, gpu: &GpuContext, count: usize) {
        let Some(state) = &mut self.state else {
            return;
        };
        if count <= state.object_capacity {
            return;
        }
        let capacity = count.next_power_of_two();
        let (buffer, bind_group) =
            object_resources(gpu, &self.label, &state.target.object_layout, capacity, state.object_stride);
        state.object_buffer = buffer;
        state.object_bind_group = bind_group;
        state.object_capacity = capacity;
        debug!(pass = %self.label, capacity, "object buffer grown");
    }
}

impl RenderNode for ScenePass {
    fn label(&self) -> &str {
        &self.label
    }

    #[instrument(skip_all, fields(pass = %self.label))]
    fn prepare(
        &mut self,
        ctx: &PrepareContext,
        output: &TargetInfo,
        _inputs: &[TargetInfo],
    ) -> RenderResult<()> {
        let gpu = ctx.gpu;
        let device = &gpu.device;

        // Layouts survive a re-prepare so instanced draws keep one pipeline per pass.
        let (frame_layout, object_layout) = match &self.state {
            Some(state) => (
                state.target.frame_layout.clone(),
                state.target.object_layout.clone(),
            ),
            None => (
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Scene Frame Layout"),
                    entries: &[uniform_entry(0, false, std::mem::size_of::<FrameUniforms>())],
                }),
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Scene Object Layout"),
                    entries: &[uniform_entry(0, true, std::mem::size_of::<ObjectUniforms>())],
                }),
            ),
        };

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} Frame Uniforms", self.label)),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Frame Bind Group", self.label)),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let alignment = gpu.limits().min_uniform_buffer_offset_alignment as u64;
        let object_stride = (std::mem::size_of::<ObjectUniforms>() as u64).next_multiple_of(alignment);
        let object_capacity = 64;
        let (object_buffer, object_bind_group) =
            object_resources(gpu, &self.label, &object_layout, object_capacity, object_stride);

        let depth_view = create_depth_view(gpu, &self.label, output.width, output.height);
        let target = SceneTarget {
            format: output.format,
            frame_layout,
            object_layout,
        };

        for draw in self.scene.borrow().instanced_draws() {
            draw.borrow_mut().prepare(gpu, &target);
        }

        self.state = Some(SceneState {
            target,
            output: *output,
            frame_buffer,
            frame_bind_group,
            object_buffer,
            object_bind_group,
            object_capacity,
            object_stride,
            depth_view,
            mesh_pipeline: None,
            generation: 0,
        });
        self.rebuild_mesh_pipeline(gpu);

        debug!(
            pass = %self.label,
            width = output.width,
            height = output.height,
            "scene pass prepared"
        );
        Ok(())
    }

    fn update(&mut self, gpu: &GpuContext, frame: &FrameState) {
        let mut draws = std::mem::take(&mut self.draws);
        self.scene.borrow().collect_draws(&mut draws);
        self.ensure_object_capacity(gpu, draws.len());
        let Some(state) = &self.state else {
            self.draws = draws;
            return;
        };

        let aspect = state.output.width as f32 / state.output.height as f32;
        let uniforms = FrameUniforms {
            view: frame.view.to_cols_array_2d(),
            proj: self.projection.matrix(aspect).to_cols_array_2d(),
            focal_dist: frame.focal_dist,
            focal_range: frame.focal_range,
            time: frame.time,
            _pad: 0.0,
        };
        gpu.queue
            .write_buffer(&state.frame_buffer, 0, bytemuck::bytes_of(&uniforms));

        if !draws.is_empty() {
            let stride = state.object_stride as usize;
            let mut bytes = vec![0u8; stride * draws.len()];
            for (i, item) in draws.iter().enumerate() {
                let color = match &item.kind {
                    DrawKind::Mesh { color, .. } => *color,
                    DrawKind::Instanced(draw) => {
                        let mut draw = draw.borrow_mut();
                        draw.update(gpu);
                        draw.color()
                    }
                };
                let object = ObjectUniforms::new(item.model, color);
                bytes[i * stride..i * stride + std::mem::size_of::<ObjectUniforms>()]
                    .copy_from_slice(bytemuck::bytes_of(&object));
            }
            gpu.queue.write_buffer(&state.object_buffer, 0, &bytes);
        }

        self.draws = draws;
    }

    fn execute(
        &self,
        ctx: &mut RenderContext,
        target: &wgpu::TextureView,
        _inputs: &[&wgpu::TextureView],
    ) {
        let Some(state) = &self.state else {
            return;
        };

        let mut render_pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&self.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: state.output.load_op(),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &state.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_bind_group(0, &state.frame_bind_group, &[]);

        let offset = |i: usize| [(i as u64 * state.object_stride) as u32];
        let is_transparent = |kind: &DrawKind| match kind {
            DrawKind::Instanced(draw) => draw.borrow().blend() == Blend::Transparent,
            DrawKind::Mesh { .. } => false,
        };

        for transparent_pass in [false, true] {
            for (i, item) in self.draws.iter().enumerate() {
                if is_transparent(&item.kind) != transparent_pass {
                    continue;
                }
                match &item.kind {
                    DrawKind::Mesh { mesh, .. } => {
                        let Some(pipeline) = &state.mesh_pipeline else {
                            continue;
                        };
                        render_pass.set_pipeline(pipeline);
                        render_pass.set_bind_group(1, &state.object_bind_group, &offset(i));
                        mesh.draw(&mut render_pass, 0..1);
                    }
                    DrawKind::Instanced(draw) => {
                        render_pass.set_bind_group(1, &state.object_bind_group, &offset(i));
                        draw.borrow().record(&mut render_pass, &state.target);
                    }
                }
            }
        }
    }

    fn check_reload(&mut self, gpu: &GpuContext) {
        self.program.check_reload();
        if self
            .state
            .as_ref()
            .is_some_and(|s| s.generation != self.program.generation())
        {
            self.rebuild_mesh_pipeline(gpu);
        }
        for draw in self.scene.borrow().instanced_draws() {
            draw.borrow_mut().check_reload(gpu);
        }
    }
}

fn uniform_entry(binding: u32, dynamic: bool, size: usize) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: wgpu::BufferSize::new(size as u64),
        },
        count: None,
    }
}

fn object_resources(
    gpu: &GpuContext,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    capacity: usize,
    stride: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("{label} Object Uniforms")),
        size: stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{label} Object Bind Group")),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<ObjectUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}

fn create_depth_view(gpu: &GpuContext, label: &str, width: u32, height: u32) -> wgpu::TextureView {
    gpu.device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label} Depth")),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

/// Builds a pipeline for scene geometry in `target`'s layouts.
///
/// `instances` is the group-2 layout of an instanced draw, if any. Opaque
/// pipelines write depth and cull back faces; transparent ones blend with
/// source alpha, test depth without writing it, and leave the destination
/// alpha (the blur factor) untouched.
pub(crate) fn scene_pipeline(
    gpu: &GpuContext,
    label: &str,
    compiled: &CompiledProgram,
    target: &SceneTarget,
    instances: Option<&wgpu::BindGroupLayout>,
    blend: Blend,
) -> RenderResult<wgpu::RenderPipeline> {
    if let Some(missing) = compiled
        .vertex_inputs
        .iter()
        .find(|loc| !Vertex3d::LOCATIONS.contains(loc))
    {
        return Err(RenderError::shader_compile(
            label,
            format!("vertex input @location({missing}) is not provided by the mesh"),
        ));
    }

    program::scoped_build(gpu, label, || {
        let device = &gpu.device;
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} Vertex")),
            source: wgpu::ShaderSource::Wgsl(compiled.vertex.as_str().into()),
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} Fragment")),
            source: wgpu::ShaderSource::Wgsl(compiled.fragment.as_str().into()),
        });

        let mut layouts = vec![&target.frame_layout, &target.object_layout];
        layouts.extend(instances);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label} Pipeline Layout")),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        let (color_blend, write_mask, depth_write, cull_mode) = match blend {
            Blend::Opaque => (
                wgpu::BlendState::REPLACE,
                wgpu::ColorWrites::ALL,
                true,
                Some(wgpu::Face::Back),
            ),
            Blend::Transparent => (
                wgpu::BlendState::ALPHA_BLENDING,
                wgpu::ColorWrites::COLOR,
                false,
                None,
            ),
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some(program::VERTEX_ENTRY),
                buffers: &[Vertex3d::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some(program::FRAGMENT_ENTRY),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target.format,
                    blend: Some(color_blend),
                    write_mask,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: depth_write,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn uniform_structs_match_wgsl_sizes() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 144);
        assert_eq!(std::mem::size_of::<ObjectUniforms>(), 144);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let object = ObjectUniforms::new(model, Vec4::ONE);
        let normal = Mat4::from_cols_array_2d(&object.normal_matrix);
        let n = normal.transform_vector3(Vec3::X);
        assert!((n - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn projection_uses_degrees() {
        let p = Projection::default().matrix(1.0);
        // cot(25°) on the y axis
        assert!((p.y_axis.y - 1.0 / 25f32.to_radians().tan()).abs() < 1e-4);
    }
}
