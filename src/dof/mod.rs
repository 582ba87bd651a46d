//! Depth of field as a five-pass pipeline.
//!
//! The scene is rendered sharp at full resolution with each pixel's blur
//! factor in alpha, rendered (or resampled) again at half resolution, blurred
//! along X then Y, and finally mixed with the sharp image by that blur factor.
//!
//! ```no_run
//! use refract::dof::{DepthOfField, DofConfig};
//! use refract::gpu::GpuContext;
//! use refract::mesh::{Mesh, RawGeometry};
//! use refract::scene::SceneNode;
//! use std::rc::Rc;
//!
//! let gpu = GpuContext::headless(640, 480)?;
//! let mut dof = DepthOfField::new(DofConfig::default());
//! let sphere = Rc::new(Mesh::new(&gpu, "sphere", &RawGeometry::sphere(32, 16)));
//! dof.scene_parent().borrow_mut().add(SceneNode::mesh(sphere, glam::Vec4::ONE));
//! dof.set_focal_point(-20.0, 10.0);
//! dof.init(&gpu)?;
//! # Ok::<(), refract::error::RenderError>(())
//! ```

pub mod kernel;
pub mod pipeline;

use std::cell::RefCell;
use std::rc::Rc;

use glam::Mat4;
use tracing::{info, instrument, warn};

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::render_graph::{FrameState, PipelineGraph};
use crate::scene::Scene;

pub use pipeline::{DofPasses, DofTargets};

/// How pass two produces the half-resolution image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DownsampleMode {
    /// Draw the scene again into the half-size target.
    #[default]
    Rerender,
    /// Resample the focused image with a textured quad.
    FocusedTexture,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DofConfig {
    pub clear_color: wgpu::Color,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Size of the focused image. Blur targets are half this.
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub focal_dist: f32,
    pub focal_range: f32,
    pub downsample: DownsampleMode,
    /// Scale on the blur tap spacing; 1 is the reference kernel.
    pub blur_spread: f32,
}

impl Default for DofConfig {
    fn default() -> Self {
        Self {
            clear_color: wgpu::Color {
                r: 0.2,
                g: 0.2,
                b: 0.4,
                a: 1.0,
            },
            fov: 50.0,
            near: 0.1,
            far: 100.0,
            width: 640,
            height: 480,
            format: wgpu::TextureFormat::Rgba16Float,
            focal_dist: -40.0,
            focal_range: 20.0,
            downsample: DownsampleMode::Rerender,
            blur_spread: 1.0,
        }
    }
}

impl DofConfig {
    pub fn with_clear_color(mut self, color: wgpu::Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_fov(mut self, degrees: f32) -> Self {
        self.fov = degrees;
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_focal_point(mut self, dist: f32, range: f32) -> Self {
        self.focal_dist = dist;
        self.focal_range = range;
        self
    }

    pub fn with_downsample(mut self, mode: DownsampleMode) -> Self {
        self.downsample = mode;
        self
    }

    pub fn with_blur_spread(mut self, spread: f32) -> Self {
        self.blur_spread = spread;
        self
    }
}

/// Built pipeline plus the handles into it.
struct Built {
    graph: PipelineGraph,
    passes: DofPasses,
    targets: DofTargets,
}

/// The depth-of-field controller.
///
/// Content goes under [`scene_parent`](Self::scene_parent) before
/// [`init`](Self::init). After that only the focal point changes; it is read
/// once per frame, so a change made mid-frame applies to the next frame.
pub struct DepthOfField {
    config: DofConfig,
    scene: Rc<RefCell<Scene>>,
    focal_dist: f32,
    focal_range: f32,
    built: Option<Built>,
}

impl DepthOfField {
    pub fn new(config: DofConfig) -> Self {
        Self {
            focal_dist: config.focal_dist,
            focal_range: config.focal_range,
            config,
            scene: Rc::new(RefCell::new(Scene::new())),
            built: None,
        }
    }

    /// Where scene content is attached. Both scene passes draw this tree.
    pub fn scene_parent(&self) -> Rc<RefCell<Scene>> {
        Rc::clone(&self.scene)
    }

    pub fn config(&self) -> &DofConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.built.is_some()
    }

    fn before_init(&self, what: &str) -> bool {
        if self.built.is_some() {
            warn!(setting = what, "ignored: pipeline already initialized");
            return false;
        }
        true
    }

    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        if self.before_init("clear_color") {
            self.config.clear_color = color;
        }
    }

    /// Vertical field of view in degrees.
    pub fn set_fov(&mut self, degrees: f32) {
        if self.before_init("fov") {
            self.config.fov = degrees;
        }
    }

    pub fn set_min_z_near(&mut self, near: f32) {
        if self.before_init("near") {
            self.config.near = near;
        }
    }

    pub fn set_focal_point(&mut self, dist: f32, range: f32) {
        self.focal_dist = dist;
        self.focal_range = range;
    }

    /// Eye-space z of the focal plane. Negative values lie in front of the camera.
    pub fn set_focal_dist(&mut self, dist: f32) {
        self.focal_dist = dist;
    }

    /// Distance from the focal plane at which blur is total.
    pub fn set_focal_range(&mut self, range: f32) {
        self.focal_range = range;
    }

    pub fn focal_dist(&self) -> f32 {
        self.focal_dist
    }

    pub fn focal_range(&self) -> f32 {
        self.focal_range
    }

    /// Widens or narrows the blur by scaling the tap spacing.
    ///
    /// Unlike the camera settings this may change at any time: after
    /// [`init`](Self::init) it updates the two blur passes' uniforms, which
    /// take effect from the next frame.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if `spread` is negative or not finite.
    pub fn set_blur_spread(&mut self, spread: f32) -> RenderResult<()> {
        if !spread.is_finite() || spread < 0.0 {
            return Err(RenderError::configuration(format!(
                "blur spread must be a finite non-negative scale, got {spread}"
            )));
        }
        self.config.blur_spread = spread;

        let (width, height) = (self.config.width, self.config.height);
        if let Some(built) = &mut self.built {
            let passes = built.passes;
            built
                .graph
                .set_uniform(passes.blur_x, "texel", [kernel::blur_texel(width, spread), 0.0])?;
            built
                .graph
                .set_uniform(passes.blur_y, "texel", [0.0, kernel::blur_texel(height, spread)])?;
        }
        Ok(())
    }

    pub fn blur_spread(&self) -> f32 {
        self.config.blur_spread
    }

    pub fn graph(&self) -> Option<&PipelineGraph> {
        self.built.as_ref().map(|b| &b.graph)
    }

    pub fn passes(&self) -> Option<DofPasses> {
        self.built.as_ref().map(|b| b.passes)
    }

    pub fn targets(&self) -> Option<DofTargets> {
        self.built.as_ref().map(|b| b.targets)
    }

    /// Builds the five passes and their targets.
    ///
    /// Fails with a configuration error when nothing is attached to the scene
    /// parent, and with an allocation error when the configured size is
    /// unusable on this device.
    #[instrument(skip_all, fields(width = self.config.width, height = self.config.height))]
    pub fn init(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        if self.scene.borrow().is_empty() {
            return Err(RenderError::configuration("no scene data under the scene parent"));
        }
        if self.built.is_some() {
            warn!("depth of field already initialized; rebuilding");
        }

        let (builder, targets, passes) = pipeline::wire(&self.config, Rc::clone(&self.scene));
        let graph = builder.build(gpu)?;
        info!(mode = ?self.config.downsample, "depth of field ready");
        self.built = Some(Built {
            graph,
            passes,
            targets,
        });
        Ok(())
    }

    fn frame_state(&self, view: Mat4, time: f32) -> FrameState {
        FrameState {
            view,
            time,
            focal_dist: self.focal_dist,
            focal_range: self.focal_range,
        }
    }

    fn built_mut(&mut self) -> RenderResult<&mut Built> {
        self.built
            .as_mut()
            .ok_or_else(|| RenderError::configuration("update() called before init()"))
    }

    /// Renders and presents one frame. Call exactly once per frame.
    pub fn update(&mut self, gpu: &GpuContext, view: Mat4, time: f32) -> RenderResult<()> {
        let frame = self.frame_state(view, time);
        self.built_mut()?.graph.execute(gpu, &frame)
    }

    /// Renders one frame into `target` instead of the surface.
    pub fn update_to_view(
        &mut self,
        gpu: &GpuContext,
        view: Mat4,
        time: f32,
        target: &wgpu::TextureView,
    ) -> RenderResult<()> {
        let frame = self.frame_state(view, time);
        self.built_mut()?.graph.execute_to_view(gpu, &frame, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_follow_the_reference_setup() {
        let dof = DepthOfField::new(DofConfig::default());
        assert_eq!(dof.focal_dist(), -40.0);
        assert_eq!(dof.focal_range(), 20.0);
        assert_eq!(dof.config().width, 640);
        assert_eq!(dof.config().downsample, DownsampleMode::Rerender);
        assert!(!dof.is_initialized());
    }

    #[test]
    fn update_before_init_is_a_configuration_error() {
        let mut dof = DepthOfField::new(DofConfig::default());
        let err = dof.built_mut().err();
        assert!(matches!(err, Some(RenderError::Configuration(_))));
    }

    #[test]
    fn pre_init_setters_change_the_config() {
        let mut dof = DepthOfField::new(DofConfig::default());
        dof.set_fov(30.0);
        dof.set_min_z_near(0.5);
        dof.set_clear_color(wgpu::Color::BLACK);
        assert_eq!(dof.config().fov, 30.0);
        assert_eq!(dof.config().near, 0.5);
        assert_eq!(dof.config().clear_color, wgpu::Color::BLACK);
    }

    #[test]
    fn blur_spread_is_validated_before_init() {
        let mut dof = DepthOfField::new(DofConfig::default());
        assert_eq!(dof.blur_spread(), 1.0);
        dof.set_blur_spread(2.5).unwrap();
        assert_eq!(dof.config().blur_spread, 2.5);
        for bad in [-1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(dof.set_blur_spread(bad), Err(RenderError::Configuration(_))));
        }
        assert_eq!(dof.blur_spread(), 2.5);
    }

    #[test]
    fn scene_parent_is_shared() {
        let dof = DepthOfField::new(DofConfig::default());
        assert!(Rc::ptr_eq(&dof.scene_parent(), &dof.scene_parent()));
    }

    #[test]
    fn frame_snapshot_carries_focal_values() {
        let mut dof = DepthOfField::new(DofConfig::default());
        dof.set_focal_point(-20.0, 10.0);
        let frame = dof.frame_state(Mat4::IDENTITY, 1.5);
        assert_eq!(frame.focal_dist, -20.0);
        assert_eq!(frame.focal_range, 10.0);
        assert_eq!(frame.time, 1.5);
    }

    proptest! {
        #[test]
        fn focal_setters_round_trip(d in proptest::num::f32::NORMAL | proptest::num::f32::ZERO, r in -1.0e6f32..1.0e6) {
            let mut dof = DepthOfField::new(DofConfig::default());
            dof.set_focal_dist(d);
            dof.set_focal_range(r);
            prop_assert_eq!(dof.focal_dist(), d);
            prop_assert_eq!(dof.focal_range(), r);
        }
    }
}
