//! The pipeline graph and its builder.

use std::rc::Rc;

use tracing::{error, info, instrument};

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::render_graph::{
    FrameState, PrepareContext, QuadMesh, RenderContext, RenderNode, RenderTarget, TargetDesc,
    TargetInfo, UniformValue,
};

/// Handle to a target declared on a [`PipelineGraphBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(usize);

/// Handle to a pass declared on a [`PipelineGraphBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PassId(usize);

/// Where a pass writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutput {
    /// An off-screen target owned by the graph.
    Target(TargetId),
    /// The frame being presented (or the view handed to
    /// [`PipelineGraph::execute_to_view`]).
    Frame,
}

struct PassDecl {
    node: Box<dyn RenderNode>,
    inputs: Vec<TargetId>,
    output: PassOutput,
}

/// One pass as the planner sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedPass {
    pub label: String,
    pub inputs: Vec<TargetId>,
    pub output: PassOutput,
}

/// A validated wiring of passes and targets, computed without touching the GPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphLayout {
    /// Passes in execution order.
    pub passes: Vec<PlannedPass>,
    /// The pass that writes each target, indexed by target.
    pub producers: Vec<PassId>,
}

impl GraphLayout {
    pub fn producer(&self, target: TargetId) -> Option<PassId> {
        self.producers.get(target.0).copied()
    }
}

/// Builder for a [`PipelineGraph`].
///
/// Passes execute in the order they are added. That order is fixed; the
/// builder does not sort. It checks instead that every pass only reads
/// targets written by an earlier pass, which also rules out cycles.
///
/// # Example
///
/// ```ignore
/// let mut builder = PipelineGraph::builder();
/// let scene = builder.target("scene", TargetDesc::new(640, 480));
/// builder.pass(ScenePass::new(..), &[], PassOutput::Target(scene));
/// builder.pass(QuadPass::with_fragment("tint", TINT_FS, UniformBlock::new()), &[scene], PassOutput::Frame);
/// let graph = builder.build(&gpu)?;
/// ```
#[derive(Default)]
pub struct PipelineGraphBuilder {
    targets: Vec<(String, TargetDesc)>,
    passes: Vec<PassDecl>,
    frame_clear: Option<wgpu::Color>,
}

impl PipelineGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an off-screen target. Nothing is allocated until [`build`](Self::build).
    pub fn target(&mut self, label: impl Into<String>, desc: TargetDesc) -> TargetId {
        self.targets.push((label.into(), desc));
        TargetId(self.targets.len() - 1)
    }

    /// Appends a pass reading `inputs` (in binding order) and writing `output`.
    pub fn pass<N: RenderNode + 'static>(
        &mut self,
        node: N,
        inputs: &[TargetId],
        output: PassOutput,
    ) -> PassId {
        self.passes.push(PassDecl {
            node: Box::new(node),
            inputs: inputs.to_vec(),
            output,
        });
        PassId(self.passes.len() - 1)
    }

    /// Clear color for the pass writing [`PassOutput::Frame`].
    pub fn frame_clear(&mut self, color: wgpu::Color) -> &mut Self {
        self.frame_clear = Some(color);
        self
    }

    /// Validates the wiring against `limits` without allocating anything.
    ///
    /// # Errors
    ///
    /// * [`RenderError::Allocation`] if a target has a zero extent or exceeds the limits
    /// * [`RenderError::Configuration`] if a pass reads a target no earlier pass
    ///   wrote, two passes write the same target or the frame, a target is never
    ///   written, or a handle is unknown
    pub fn plan(&self, limits: &wgpu::Limits) -> RenderResult<GraphLayout> {
        for (label, desc) in &self.targets {
            desc.validate(limits).map_err(|err| match err {
                RenderError::Allocation(msg) => {
                    RenderError::allocation(format!("target `{label}`: {msg}"))
                }
                other => other,
            })?;
        }

        if self.passes.is_empty() {
            return Err(RenderError::configuration("pipeline graph has no passes"));
        }

        let mut producers: Vec<Option<PassId>> = vec![None; self.targets.len()];
        let mut frame_writer: Option<PassId> = None;
        let mut planned = Vec::with_capacity(self.passes.len());

        for (index, pass) in self.passes.iter().enumerate() {
            let label = pass.node.label();
            for input in &pass.inputs {
                let target_label = self.target_label(*input, label)?;
                if producers[input.0].is_none() {
                    return Err(RenderError::configuration(format!(
                        "pass `{label}` reads `{target_label}` before any earlier pass writes it"
                    )));
                }
            }

            match pass.output {
                PassOutput::Target(target) => {
                    let target_label = self.target_label(target, label)?;
                    if let Some(PassId(other)) = producers[target.0] {
                        return Err(RenderError::configuration(format!(
                            "`{target_label}` is written by both `{}` and `{label}`",
                            self.passes[other].node.label()
                        )));
                    }
                    producers[target.0] = Some(PassId(index));
                }
                PassOutput::Frame => {
                    if let Some(PassId(other)) = frame_writer {
                        return Err(RenderError::configuration(format!(
                            "the frame output is written by both `{}` and `{label}`",
                            self.passes[other].node.label()
                        )));
                    }
                    frame_writer = Some(PassId(index));
                }
            }

            planned.push(PlannedPass {
                label: label.to_owned(),
                inputs: pass.inputs.clone(),
                output: pass.output,
            });
        }

        let producers = producers
            .into_iter()
            .zip(&self.targets)
            .map(|(producer, (label, _))| {
                producer.ok_or_else(|| {
                    RenderError::configuration(format!("target `{label}` is never written"))
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(GraphLayout {
            passes: planned,
            producers,
        })
    }

    fn target_label(&self, target: TargetId, pass: &str) -> RenderResult<&str> {
        self.targets
            .get(target.0)
            .map(|(label, _)| label.as_str())
            .ok_or_else(|| {
                RenderError::configuration(format!(
                    "pass `{pass}` refers to unknown target #{}",
                    target.0
                ))
            })
    }

    /// Plans, allocates every target, then prepares every pass.
    ///
    /// Any failure aborts the whole build; there is no partially built graph.
    #[instrument(skip_all, fields(targets = self.targets.len(), passes = self.passes.len()))]
    pub fn build(self, gpu: &GpuContext) -> RenderResult<PipelineGraph> {
        let layout = self.plan(&gpu.limits())?;

        let targets = self
            .targets
            .iter()
            .map(|(label, desc)| RenderTarget::allocate(gpu, label, *desc))
            .collect::<RenderResult<Vec<_>>>()?;

        let mut graph = PipelineGraph {
            passes: self.passes,
            targets,
            layout,
            quad: Rc::new(QuadMesh::new(gpu)),
            frame_clear: self.frame_clear,
            frame_info: None,
        };
        graph.prepare_all(gpu)?;

        info!(
            passes = graph.passes.len(),
            targets = graph.targets.len(),
            "pipeline graph built"
        );
        Ok(graph)
    }
}

/// A fixed, validated sequence of passes and the targets they exchange.
///
/// The graph owns every target and every pass. Passes borrow input views
/// from the graph for the duration of a frame only.
pub struct PipelineGraph {
    passes: Vec<PassDecl>,
    targets: Vec<RenderTarget>,
    layout: GraphLayout,
    quad: Rc<QuadMesh>,
    frame_clear: Option<wgpu::Color>,
    frame_info: Option<TargetInfo>,
}

impl PipelineGraph {
    pub fn builder() -> PipelineGraphBuilder {
        PipelineGraphBuilder::new()
    }

    pub fn layout(&self) -> &GraphLayout {
        &self.layout
    }

    pub fn target(&self, id: TargetId) -> Option<&RenderTarget> {
        self.targets.get(id.0)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Changes a named uniform on one pass. Takes effect from the next frame.
    pub fn set_uniform(
        &mut self,
        pass: PassId,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> RenderResult<()> {
        let decl = self.passes.get_mut(pass.0).ok_or_else(|| {
            RenderError::configuration(format!("unknown pass #{}", pass.0))
        })?;
        decl.node.set_uniform(name, value.into())
    }

    fn current_frame_info(&self, gpu: &GpuContext) -> TargetInfo {
        TargetInfo {
            width: gpu.width(),
            height: gpu.height(),
            format: gpu.config.format,
            clear: self.frame_clear,
        }
    }

    fn prepare_all(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        let frame_info = self.current_frame_info(gpu);
        let ctx = PrepareContext {
            gpu,
            quad: &self.quad,
        };
        for pass in &mut self.passes {
            let output = match pass.output {
                PassOutput::Target(id) => self.targets[id.0].info(),
                PassOutput::Frame => frame_info,
            };
            let inputs: Vec<TargetInfo> = pass
                .inputs
                .iter()
                .map(|id| self.targets[id.0].info())
                .collect();
            pass.node.prepare(&ctx, &output, &inputs)?;
        }
        self.frame_info = Some(frame_info);
        Ok(())
    }

    /// Re-prepares passes writing the frame after the output was resized.
    fn sync_frame_output(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        let frame_info = self.current_frame_info(gpu);
        if self.frame_info == Some(frame_info) {
            return Ok(());
        }
        let ctx = PrepareContext {
            gpu,
            quad: &self.quad,
        };
        for pass in self
            .passes
            .iter_mut()
            .filter(|p| p.output == PassOutput::Frame)
        {
            let inputs: Vec<TargetInfo> = pass
                .inputs
                .iter()
                .map(|id| self.targets[id.0].info())
                .collect();
            pass.node.prepare(&ctx, &frame_info, &inputs)?;
        }
        self.frame_info = Some(frame_info);
        Ok(())
    }

    /// Checks every pass for program source changes.
    ///
    /// Called automatically at the start of each frame, before any pass runs.
    pub fn check_reload(&mut self, gpu: &GpuContext) {
        for pass in &mut self.passes {
            pass.node.check_reload(gpu);
        }
    }

    /// Runs one frame and presents it.
    pub fn execute(&mut self, gpu: &GpuContext, frame: &FrameState) -> RenderResult<()> {
        let surface = gpu
            .surface
            .as_ref()
            .ok_or_else(|| RenderError::device("headless context has no surface to present"))?;
        let output = surface.get_current_texture().map_err(|e| {
            error!(error = %e, "failed to acquire surface texture");
            RenderError::device(format!("failed to acquire surface texture: {e}"))
        })?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.execute_to_view(gpu, frame, &view)?;
        output.present();
        Ok(())
    }

    /// Runs one frame, writing the frame output into `view` instead of the surface.
    ///
    /// `view` must match the context's configured format and size.
    pub fn execute_to_view(
        &mut self,
        gpu: &GpuContext,
        frame: &FrameState,
        view: &wgpu::TextureView,
    ) -> RenderResult<()> {
        self.check_reload(gpu);
        self.sync_frame_output(gpu)?;

        for pass in &mut self.passes {
            pass.node.update(gpu, frame);
        }

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pipeline Graph Encoder"),
            });

        {
            let mut ctx = RenderContext {
                gpu,
                encoder: &mut encoder,
                frame,
            };
            for pass in &self.passes {
                let target = match pass.output {
                    PassOutput::Target(id) => &self.targets[id.0].view,
                    PassOutput::Frame => view,
                };
                let inputs: Vec<&wgpu::TextureView> = pass
                    .inputs
                    .iter()
                    .map(|id| &self.targets[id.0].view)
                    .collect();
                pass.node.execute(&mut ctx, target, &inputs);
            }
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe(&'static str);

    impl RenderNode for Probe {
        fn label(&self) -> &str {
            self.0
        }

        fn prepare(
            &mut self,
            _ctx: &PrepareContext,
            _output: &TargetInfo,
            _inputs: &[TargetInfo],
        ) -> RenderResult<()> {
            Ok(())
        }

        fn execute(
            &self,
            _ctx: &mut RenderContext,
            _target: &wgpu::TextureView,
            _inputs: &[&wgpu::TextureView],
        ) {
        }
    }

    fn limits() -> wgpu::Limits {
        wgpu::Limits::default()
    }

    #[test]
    fn linear_chain_plans_in_declaration_order() {
        let mut b = PipelineGraph::builder();
        let a = b.target("a", TargetDesc::new(64, 64));
        let c = b.target("c", TargetDesc::new(32, 32));
        b.pass(Probe("first"), &[], PassOutput::Target(a));
        b.pass(Probe("second"), &[a], PassOutput::Target(c));
        b.pass(Probe("last"), &[a, c], PassOutput::Frame);

        let layout = b.plan(&limits()).unwrap();
        let labels: Vec<_> = layout.passes.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["first", "second", "last"]);
        assert_eq!(layout.producer(a), Some(PassId(0)));
        assert_eq!(layout.producer(c), Some(PassId(1)));
        assert_eq!(layout.passes[2].inputs, vec![a, c]);
    }

    #[test]
    fn zero_sized_target_fails_with_allocation_error() {
        let mut b = PipelineGraph::builder();
        let t = b.target("empty", TargetDesc::new(0, 0));
        b.pass(Probe("p"), &[], PassOutput::Target(t));
        let err = b.plan(&limits()).unwrap_err();
        assert!(matches!(err, RenderError::Allocation(_)));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn forward_reference_is_a_configuration_error() {
        let mut b = PipelineGraph::builder();
        let x = b.target("x", TargetDesc::new(8, 8));
        let y = b.target("y", TargetDesc::new(8, 8));
        // x <- y and y <- x: a cycle, expressed as a read-before-write.
        b.pass(Probe("reads_y"), &[y], PassOutput::Target(x));
        b.pass(Probe("reads_x"), &[x], PassOutput::Target(y));
        let err = b.plan(&limits()).unwrap_err();
        assert!(matches!(err, RenderError::Configuration(_)));
        assert!(err.to_string().contains("reads_y"));
    }

    #[test]
    fn self_read_is_a_configuration_error() {
        let mut b = PipelineGraph::builder();
        let x = b.target("x", TargetDesc::new(8, 8));
        b.pass(Probe("loop"), &[x], PassOutput::Target(x));
        assert!(matches!(
            b.plan(&limits()),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn second_writer_is_a_configuration_error() {
        let mut b = PipelineGraph::builder();
        let x = b.target("x", TargetDesc::new(8, 8));
        b.pass(Probe("one"), &[], PassOutput::Target(x));
        b.pass(Probe("two"), &[], PassOutput::Target(x));
        let err = b.plan(&limits()).unwrap_err();
        assert!(err.to_string().contains("written by both"));

        let mut b = PipelineGraph::builder();
        b.pass(Probe("one"), &[], PassOutput::Frame);
        b.pass(Probe("two"), &[], PassOutput::Frame);
        assert!(matches!(
            b.plan(&limits()),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn unwritten_target_is_a_configuration_error() {
        let mut b = PipelineGraph::builder();
        b.target("orphan", TargetDesc::new(8, 8));
        b.pass(Probe("p"), &[], PassOutput::Frame);
        let err = b.plan(&limits()).unwrap_err();
        assert!(err.to_string().contains("orphan"));
    }

    #[test]
    fn unknown_target_handle_is_rejected() {
        let mut other = PipelineGraph::builder();
        other.target("a", TargetDesc::new(8, 8));
        let foreign = other.target("b", TargetDesc::new(8, 8));

        let mut b = PipelineGraph::builder();
        b.pass(Probe("p"), &[foreign], PassOutput::Frame);
        assert!(matches!(
            b.plan(&limits()),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn empty_graph_is_rejected() {
        assert!(matches!(
            PipelineGraph::builder().plan(&limits()),
            Err(RenderError::Configuration(_))
        ));
    }
}
