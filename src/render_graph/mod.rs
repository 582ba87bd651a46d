//! Render graph for fixed multi-pass pipelines.
//!
//! A [`PipelineGraph`] owns a set of off-screen [`RenderTarget`]s and an ordered
//! list of passes. Each pass writes one target (or the frame) and samples any
//! targets written before it. The wiring is validated up front by
//! [`PipelineGraphBuilder::plan`], which needs no GPU.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = PipelineGraph::builder();
//! let full = builder.target("full", TargetDesc::new(640, 480));
//! let half = builder.target("half", TargetDesc::new(320, 240));
//! builder.pass(scene_pass, &[], PassOutput::Target(full));
//! builder.pass(QuadPass::with_fragment("downsample", shaders::DOWNSAMPLE_FS, UniformBlock::new()),
//!     &[full], PassOutput::Target(half));
//! builder.pass(QuadPass::with_fragment("show", shaders::DOWNSAMPLE_FS, UniformBlock::new()),
//!     &[half], PassOutput::Frame);
//! let mut graph = builder.build(&gpu)?;
//!
//! graph.execute(&gpu, &frame_state)?;
//! ```

mod graph;
mod quad_pass;
mod readback;
mod render_node;
mod render_target;
mod uniforms;

pub use graph::{
    GraphLayout, PassId, PassOutput, PipelineGraph, PipelineGraphBuilder, PlannedPass, TargetId,
};
pub use quad_pass::{QuadMesh, QuadPass, QuadVertex, Viewport};
pub use readback::read_texture;
pub use render_node::{PrepareContext, RenderNode};
pub use render_target::{FrameState, RenderContext, RenderTarget, TargetDesc, TargetInfo};
pub use uniforms::{UniformBlock, UniformValue};
