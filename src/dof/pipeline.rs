//! Wiring of the five depth-of-field passes.
//!
//! ```text
//! scene ──► focused (full) ───────────────────────────────┐
//!   │                                                     ▼
//!   └─► downsampled (half) ─► blur_x (half) ─► blur_y ─► composite ─► frame
//! ```
//!
//! The second pass re-renders the scene at half size by default; with
//! [`DownsampleMode::FocusedTexture`] it resamples the focused image instead.

use std::cell::RefCell;
use std::rc::Rc;

use crate::dof::{DofConfig, DownsampleMode, kernel};
use crate::render_graph::{
    PassId, PassOutput, PipelineGraphBuilder, QuadPass, TargetDesc, TargetId, UniformBlock,
};
use crate::scene::Scene;
use crate::scene_pass::{Projection, ScenePass};
use crate::shaders;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DofTargets {
    pub focused: TargetId,
    pub downsampled: TargetId,
    pub blur_x: TargetId,
    pub blur_y: TargetId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DofPasses {
    pub scene: PassId,
    pub downsample: PassId,
    pub blur_x: PassId,
    pub blur_y: PassId,
    pub composite: PassId,
}

/// Declares the targets and passes on a fresh builder. Nothing touches the
/// GPU until the builder is built.
pub fn wire(
    config: &DofConfig,
    scene: Rc<RefCell<Scene>>,
) -> (PipelineGraphBuilder, DofTargets, DofPasses) {
    let mut builder = PipelineGraphBuilder::new();
    builder.frame_clear(config.clear_color);

    let full = TargetDesc::new(config.width, config.height)
        .with_format(config.format)
        .with_clear(config.clear_color);
    let half = full.half();

    let targets = DofTargets {
        focused: builder.target("focused", full),
        downsampled: builder.target("downsampled", half),
        blur_x: builder.target("blur_x", half.no_clear()),
        blur_y: builder.target("blur_y", half.no_clear()),
    };

    let projection = Projection {
        fov_y: config.fov,
        near: config.near,
        far: config.far,
    };

    let scene_pass = builder.pass(
        ScenePass::new("scene", Rc::clone(&scene), projection),
        &[],
        PassOutput::Target(targets.focused),
    );

    let downsample = match config.downsample {
        DownsampleMode::Rerender => builder.pass(
            ScenePass::new("downsample", scene, projection),
            &[],
            PassOutput::Target(targets.downsampled),
        ),
        DownsampleMode::FocusedTexture => builder.pass(
            QuadPass::with_fragment("downsample", shaders::DOWNSAMPLE_FS, UniformBlock::new()),
            &[targets.focused],
            PassOutput::Target(targets.downsampled),
        ),
    };

    let blur_x = builder.pass(
        QuadPass::with_fragment("blur_x", shaders::BLUR_X_FS, kernel::blur_x_uniforms(config.width, config.blur_spread)),
        &[targets.downsampled],
        PassOutput::Target(targets.blur_x),
    );
    let blur_y = builder.pass(
        QuadPass::with_fragment("blur_y", shaders::BLUR_Y_FS, kernel::blur_y_uniforms(config.height, config.blur_spread)),
        &[targets.blur_x],
        PassOutput::Target(targets.blur_y),
    );
    let composite = builder.pass(
        QuadPass::with_fragment("composite", shaders::DOF_COMPOSITE_FS, UniformBlock::new()),
        &[targets.focused, targets.blur_y],
        PassOutput::Frame,
    );

    let passes = DofPasses {
        scene: scene_pass,
        downsample,
        blur_x,
        blur_y,
        composite,
    };
    (builder, targets, passes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::GraphLayout;

    fn plan(config: &DofConfig) -> GraphLayout {
        let (builder, _, _) = wire(config, Rc::new(RefCell::new(Scene::new())));
        builder.plan(&wgpu::Limits::default()).unwrap()
    }

    #[test]
    fn five_passes_in_fixed_order() {
        let layout = plan(&DofConfig::default());
        let labels: Vec<_> = layout.passes.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["scene", "downsample", "blur_x", "blur_y", "composite"]);
        assert_eq!(layout.passes[4].output, PassOutput::Frame);
    }

    #[test]
    fn rerender_mode_reads_nothing_in_pass_two() {
        let layout = plan(&DofConfig::default());
        assert!(layout.passes[1].inputs.is_empty());
    }

    #[test]
    fn texture_mode_reads_the_focused_image() {
        let config = DofConfig::default().with_downsample(DownsampleMode::FocusedTexture);
        let (builder, targets, _) = wire(&config, Rc::new(RefCell::new(Scene::new())));
        let layout = builder.plan(&wgpu::Limits::default()).unwrap();
        assert_eq!(layout.passes[1].inputs, vec![targets.focused]);
        assert_eq!(layout.passes[4].inputs, vec![targets.focused, targets.blur_y]);
    }

    #[test]
    fn zero_sized_config_fails_to_plan() {
        let config = DofConfig::default().with_size(0, 480);
        let (builder, _, _) = wire(&config, Rc::new(RefCell::new(Scene::new())));
        assert!(matches!(
            builder.plan(&wgpu::Limits::default()),
            Err(crate::error::RenderError::Allocation(_))
        ));
    }
}
