//! Full-screen quad passes.
//!
//! Every [`QuadPass`] draws the same unit quad; the only things that vary are
//! the program, the bound input textures and the uniform values. The quad's
//! vertex and index buffers live once in a [`QuadMesh`] shared by reference,
//! while each pass owns its own pipeline, uniform buffer and sampler.
//!
//! # Bindings
//!
//! All bindings live in group 0:
//!
//! | Binding     | Contents                                  |
//! |-------------|-------------------------------------------|
//! | 0           | the pass's [`UniformBlock`]               |
//! | 1..=N       | the N declared inputs, in order           |
//! | N + 1       | a linear, clamp-to-edge sampler           |
//!
//! The vertex stage receives `@location(0) position: vec2f` and
//! `@location(1) uv: vec2f`, with uv (0, 0) at the top-left of the target.

use std::rc::Rc;

use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::program::{self, CompiledProgram, Program};
use crate::render_graph::{
    FrameState, PrepareContext, RenderContext, RenderNode, TargetInfo, UniformBlock, UniformValue,
};
use crate::shaders;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl QuadVertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
    };

    /// Shader locations provided by [`Self::LAYOUT`].
    pub const LOCATIONS: [u32; 2] = [0, 1];
}

/// The unit quad: 4 vertices, 2 triangles, spanning clip space.
pub struct QuadMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
}

impl QuadMesh {
    #[rustfmt::skip]
    pub const VERTICES: [QuadVertex; 4] = [
        QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
        QuadVertex { position: [ 1.0, -1.0], uv: [1.0, 1.0] },
        QuadVertex { position: [-1.0,  1.0], uv: [0.0, 0.0] },
        QuadVertex { position: [ 1.0,  1.0], uv: [1.0, 0.0] },
    ];

    pub const INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];

    pub fn new(gpu: &GpuContext) -> Self {
        let vertex_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Quad Vertex Buffer"),
                contents: bytemuck::cast_slice(&Self::VERTICES),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Quad Index Buffer"),
                contents: bytemuck::cast_slice(&Self::INDICES),
                usage: wgpu::BufferUsages::INDEX,
            });
        Self {
            vertex_buffer,
            index_buffer,
        }
    }

    fn draw(&self, pass: &mut wgpu::RenderPass) {
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..Self::INDICES.len() as u32, 0, 0..1);
    }
}

/// Pixel rectangle a pass draws into. Defaults to the whole target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clips to the target; `None` if nothing of the rectangle remains.
    pub fn clamped(&self, target_width: u32, target_height: u32) -> Option<Self> {
        let x = self.x.clamp(0.0, target_width as f32);
        let y = self.y.clamp(0.0, target_height as f32);
        let width = (self.x + self.width).min(target_width as f32) - x;
        let height = (self.y + self.height).min(target_height as f32) - y;
        (width > 0.0 && height > 0.0).then_some(Self::new(x, y, width, height))
    }
}

struct QuadState {
    pipeline: Option<wgpu::RenderPipeline>,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    quad: Rc<QuadMesh>,
    output: TargetInfo,
    inputs: Vec<TargetInfo>,
    generation: u64,
    fallback: bool,
}

/// A quad pass: one program, N input textures, named uniforms.
pub struct QuadPass {
    label: String,
    program: Program,
    uniforms: UniformBlock,
    uniforms_dirty: bool,
    viewport: Option<Viewport>,
    state: Option<QuadState>,
}

impl QuadPass {
    /// Creates a pass around `program`.
    ///
    /// The program's vertex stage is normally [`shaders::QUAD_VS`].
    pub fn new(label: impl Into<String>, program: Program, uniforms: UniformBlock) -> Self {
        Self {
            label: label.into(),
            program,
            uniforms,
            uniforms_dirty: false,
            viewport: None,
            state: None,
        }
    }

    /// Convenience for the common case of the shared quad vertex stage.
    pub fn with_fragment(label: impl Into<String>, fragment: &str, uniforms: UniformBlock) -> Self {
        let label = label.into();
        let program = Program::new(label.clone(), shaders::QUAD_VS, fragment);
        Self::new(label, program, uniforms)
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Mutable access for source reloads. Changes take effect at the next
    /// between-frames reload check.
    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn uniforms(&self) -> &UniformBlock {
        &self.uniforms
    }

    /// Whether the pass is currently drawing the pass-through fallback.
    pub fn uses_fallback(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.fallback)
    }

    fn rebuild(
        &mut self,
        gpu: &GpuContext,
        quad: Rc<QuadMesh>,
        output: TargetInfo,
        inputs: Vec<TargetInfo>,
    ) {
        let device = &gpu.device;
        let filterable = inputs.iter().all(|info| is_filterable(gpu, info.format));

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for binding in 1..=inputs.len() as u32 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: inputs.len() as u32 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if filterable {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", self.label)),
            entries: &entries,
        });

        let filter = if filterable {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{} Sampler", self.label)),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Uniforms", self.label)),
            contents: &self.uniforms.to_bytes(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        self.uniforms_dirty = false;

        let attempt = self
            .program
            .effective()
            .ok_or_else(|| {
                RenderError::shader_compile(&self.label, "program has no valid or enabled source")
            })
            .and_then(|compiled| {
                self.create_pipeline(gpu, compiled, &bind_group_layout, output.format)
            });

        let (pipeline, fallback) = match attempt {
            Ok(pipeline) => (Some(pipeline), false),
            Err(err) => {
                warn!(pass = %self.label, error = %err, "falling back to pass-through");
                let fallback = passthrough_program(&self.label, inputs.len())
                    .and_then(|compiled| {
                        self.create_pipeline(gpu, &compiled, &bind_group_layout, output.format)
                    })
                    .inspect_err(|err| warn!(pass = %self.label, error = %err, "fallback failed, pass disabled"))
                    .ok();
                (fallback, true)
            }
        };

        debug!(pass = %self.label, inputs = inputs.len(), fallback, "quad pass prepared");

        self.state = Some(QuadState {
            pipeline,
            bind_group_layout,
            uniform_buffer,
            sampler,
            quad,
            output,
            inputs,
            generation: self.program.generation(),
            fallback,
        });
    }

    fn create_pipeline(
        &self,
        gpu: &GpuContext,
        compiled: &CompiledProgram,
        bind_group_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
    ) -> RenderResult<wgpu::RenderPipeline> {
        if let Some(missing) = compiled
            .vertex_inputs
            .iter()
            .find(|loc| !QuadVertex::LOCATIONS.contains(loc))
        {
            return Err(RenderError::shader_compile(
                &self.label,
                format!("vertex input @location({missing}) is not provided by the quad"),
            ));
        }

        program::scoped_build(gpu, &self.label, || {
            let device = &gpu.device;
            let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{} Vertex", self.label)),
                source: wgpu::ShaderSource::Wgsl(compiled.vertex.as_str().into()),
            });
            let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{} Fragment", self.label)),
                source: wgpu::ShaderSource::Wgsl(compiled.fragment.as_str().into()),
            });

            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{} Pipeline Layout", self.label)),
                bind_group_layouts: &[bind_group_layout],
                push_constant_ranges: &[],
            });

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&self.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &vertex,
                    entry_point: Some(program::VERTEX_ENTRY),
                    buffers: &[QuadVertex::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment,
                    entry_point: Some(program::FRAGMENT_ENTRY),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
    }
}

impl RenderNode for QuadPass {
    fn label(&self) -> &str {
        &self.label
    }

    fn prepare(
        &mut self,
        ctx: &PrepareContext,
        output: &TargetInfo,
        inputs: &[TargetInfo],
    ) -> RenderResult<()> {
        self.rebuild(ctx.gpu, Rc::clone(ctx.quad), *output, inputs.to_vec());
        Ok(())
    }

    fn update(&mut self, gpu: &GpuContext, _frame: &FrameState) {
        if !self.uniforms_dirty {
            return;
        }
        if let Some(state) = &self.state {
            gpu.queue
                .write_buffer(&state.uniform_buffer, 0, &self.uniforms.to_bytes());
            self.uniforms_dirty = false;
        }
    }

    fn execute(
        &self,
        ctx: &mut RenderContext,
        target: &wgpu::TextureView,
        inputs: &[&wgpu::TextureView],
    ) {
        let Some(state) = &self.state else {
            return;
        };
        let Some(pipeline) = &state.pipeline else {
            return;
        };
        debug_assert_eq!(inputs.len(), state.inputs.len());

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: state.uniform_buffer.as_entire_binding(),
        }];
        for (i, view) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: inputs.len() as u32 + 1,
            resource: wgpu::BindingResource::Sampler(&state.sampler),
        });
        let bind_group = ctx
            .gpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} Bind Group", self.label)),
                layout: &state.bind_group_layout,
                entries: &entries,
            });

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
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some(viewport) = self
            .viewport
            .and_then(|v| v.clamped(state.output.width, state.output.height))
        {
            render_pass.set_viewport(
                viewport.x,
                viewport.y,
                viewport.width,
                viewport.height,
                0.0,
                1.0,
            );
        }
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        state.quad.draw(&mut render_pass);
    }

    fn check_reload(&mut self, gpu: &GpuContext) {
        self.program.check_reload();
        let Some(state) = &self.state else {
            return;
        };
        if state.generation != self.program.generation() {
            let (quad, output, inputs) = (Rc::clone(&state.quad), state.output, state.inputs.clone());
            self.rebuild(gpu, quad, output, inputs);
        }
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) -> RenderResult<()> {
        self.uniforms.set(name, value)?;
        self.uniforms_dirty = true;
        Ok(())
    }
}

fn is_filterable(gpu: &GpuContext, format: wgpu::TextureFormat) -> bool {
    !matches!(
        format.sample_type(None, Some(gpu.device.features())),
        Some(wgpu::TextureSampleType::Float { filterable: false })
    )
}

/// Copies the first input, or clears to transparent black without inputs.
fn passthrough_program(label: &str, input_count: usize) -> RenderResult<CompiledProgram> {
    program::compile(
        &format!("{label} (pass-through)"),
        shaders::QUAD_VS,
        &passthrough_fragment(input_count),
        &[],
    )
}

fn passthrough_fragment(input_count: usize) -> String {
    if input_count == 0 {
        return "@fragment\nfn fs() -> @location(0) vec4f {\n    return vec4f(0.0);\n}\n".to_owned();
    }
    format!(
        "@group(0) @binding(1) var source: texture_2d<f32>;\n\
         @group(0) @binding({sampler}) var source_sampler: sampler;\n\
         @fragment\n\
         fn fs(@location(0) uv: vec2f) -> @location(0) vec4f {{\n\
         \x20   return textureSampleLevel(source, source_sampler, uv, 0.0);\n\
         }}\n",
        sampler = input_count + 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_is_two_ccw_triangles_over_clip_space() {
        assert_eq!(QuadMesh::VERTICES.len(), 4);
        assert_eq!(QuadMesh::INDICES.len(), 6);
        for tri in QuadMesh::INDICES.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| QuadMesh::VERTICES[tri[i] as usize].position);
            let area = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
            assert!(area > 0.0, "triangle {tri:?} is not counter-clockwise");
        }
    }

    #[test]
    fn quad_uv_puts_origin_top_left() {
        let top_left = QuadMesh::VERTICES
            .iter()
            .find(|v| v.position == [-1.0, 1.0])
            .unwrap();
        assert_eq!(top_left.uv, [0.0, 0.0]);
    }

    #[test]
    fn passthrough_fragments_validate_for_any_input_count() {
        for inputs in 0..4 {
            assert!(
                passthrough_program("test", inputs).is_ok(),
                "{inputs} inputs"
            );
        }
    }

    #[test]
    fn viewport_clamps_to_target() {
        let vp = Viewport::new(-10.0, 20.0, 100.0, 1000.0).clamped(64, 48).unwrap();
        assert_eq!(vp, Viewport::new(0.0, 20.0, 64.0, 28.0));
        assert!(Viewport::new(100.0, 0.0, 10.0, 10.0).clamped(64, 48).is_none());
    }

    #[test]
    fn set_uniform_marks_dirty_and_checks_names() {
        let mut pass = QuadPass::with_fragment(
            "blur_x",
            shaders::BLUR_X_FS,
            UniformBlock::new().with("texel", [1.0f32, 0.0]),
        );
        assert!(pass.set_uniform("texel", [0.5f32, 0.0].into()).is_ok());
        assert!(pass.uniforms_dirty);
        assert!(pass.set_uniform("missing", 1.0f32.into()).is_err());
    }
}
