//! The core render node trait for the render graph.

use std::rc::Rc;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::render_graph::{FrameState, QuadMesh, RenderContext, TargetInfo, UniformValue};

/// Build-time resources handed to [`RenderNode::prepare`].
pub struct PrepareContext<'a> {
    pub gpu: &'a GpuContext,
    /// The unit quad shared read-only by every quad pass in the graph.
    pub quad: &'a Rc<QuadMesh>,
}

/// Trait for passes that can be wired into a [`PipelineGraph`](super::PipelineGraph).
///
/// # Execution Flow
///
/// 1. `prepare()` once at build time, after every target is allocated
/// 2. per frame, between frames: `check_reload()` for every node
/// 3. per frame: `update()` for every node, with the same frozen [`FrameState`]
/// 4. per frame: `execute()` in declaration order
///
/// Nodes never see each other. Inputs arrive as texture views in the order the
/// pass declared them.
pub trait RenderNode {
    /// Debug label used in logs and GPU captures.
    fn label(&self) -> &str;

    /// Builds GPU state for the given output surface.
    ///
    /// `inputs` describes the declared input textures, in order.
    /// Called again with a new `output` when the frame output is resized.
    fn prepare(
        &mut self,
        ctx: &PrepareContext,
        output: &TargetInfo,
        inputs: &[TargetInfo],
    ) -> RenderResult<()>;

    /// Uploads per-frame data. Runs for all nodes before any node executes.
    fn update(&mut self, _gpu: &GpuContext, _frame: &FrameState) {}

    /// Records this node's commands.
    ///
    /// * `target` - Texture view to render into (an owned target or the frame output)
    /// * `inputs` - Views of the declared inputs, in declaration order
    fn execute(
        &self,
        ctx: &mut RenderContext,
        target: &wgpu::TextureView,
        inputs: &[&wgpu::TextureView],
    );

    /// Picks up program source changes. Only called between frames.
    fn check_reload(&mut self, _gpu: &GpuContext) {}

    /// Changes a named uniform value.
    fn set_uniform(&mut self, name: &str, _value: UniformValue) -> RenderResult<()> {
        Err(RenderError::configuration(format!(
            "pass `{}` has no uniform `{name}`",
            self.label()
        )))
    }
}
