use std::cell::RefCell;
use std::rc::Rc;

use refract::dof::{DofConfig, DownsampleMode, pipeline};
use refract::render_graph::{PassOutput, PipelineGraphBuilder, QuadPass, TargetDesc, UniformBlock};
use refract::shaders;
use refract::{RenderError, Scene};

fn limits() -> wgpu::Limits {
    wgpu::Limits::default()
}

fn copy_pass(label: &'static str) -> QuadPass {
    QuadPass::with_fragment(label, shaders::DOWNSAMPLE_FS, UniformBlock::new())
}

#[test]
fn depth_of_field_wiring_respects_production_order() {
    for mode in [DownsampleMode::Rerender, DownsampleMode::FocusedTexture] {
        let config = DofConfig::default().with_downsample(mode);
        let (builder, targets, passes) =
            pipeline::wire(&config, Rc::new(RefCell::new(Scene::new())));
        let layout = builder.plan(&limits()).unwrap();

        assert_eq!(layout.producer(targets.focused), Some(passes.scene));
        assert_eq!(layout.producer(targets.downsampled), Some(passes.downsample));
        assert_eq!(layout.producer(targets.blur_x), Some(passes.blur_x));
        assert_eq!(layout.producer(targets.blur_y), Some(passes.blur_y));
        assert_eq!(layout.passes[4].output, PassOutput::Frame);
    }
}

#[test]
fn zero_sized_targets_never_build() {
    for (w, h) in [(0, 0), (0, 480), (640, 0)] {
        let config = DofConfig::default().with_size(w, h);
        let (builder, _, _) = pipeline::wire(&config, Rc::new(RefCell::new(Scene::new())));
        let err = builder.plan(&limits()).unwrap_err();
        assert!(matches!(err, RenderError::Allocation(_)), "{w}x{h}: {err}");
    }
}

#[test]
fn oversized_targets_never_build() {
    let too_big = limits().max_texture_dimension_2d * 4;
    let config = DofConfig::default().with_size(too_big, 16);
    let (builder, _, _) = pipeline::wire(&config, Rc::new(RefCell::new(Scene::new())));
    assert!(matches!(
        builder.plan(&limits()),
        Err(RenderError::Allocation(_))
    ));
}

#[test]
fn reading_a_later_pass_output_is_rejected() {
    let mut builder = PipelineGraphBuilder::new();
    let a = builder.target("a", TargetDesc::new(64, 64));
    let b = builder.target("b", TargetDesc::new(64, 64));
    builder.pass(copy_pass("first"), &[b], PassOutput::Target(a));
    builder.pass(copy_pass("second"), &[a], PassOutput::Target(b));

    let err = builder.plan(&limits()).unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));
    assert!(err.to_string().contains("before any earlier pass writes it"));
}

#[test]
fn two_passes_cannot_share_an_output() {
    let mut builder = PipelineGraphBuilder::new();
    let a = builder.target("a", TargetDesc::new(64, 64));
    builder.pass(copy_pass("first"), &[], PassOutput::Target(a));
    builder.pass(copy_pass("second"), &[], PassOutput::Target(a));
    builder.pass(copy_pass("present"), &[a], PassOutput::Frame);

    assert!(matches!(
        builder.plan(&limits()),
        Err(RenderError::Configuration(_))
    ));
}

#[test]
fn half_targets_round_down_to_at_least_one_pixel() {
    let desc = TargetDesc::new(641, 1).half();
    assert_eq!((desc.width, desc.height), (320, 1));
}
