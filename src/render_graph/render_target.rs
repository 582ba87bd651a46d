//! Render targets and execution context for the render graph.

use glam::{Mat4, Vec4};
use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::render_graph::readback;

/// Size, format and clear color of an off-screen target.
///
/// Validation is separate from allocation so a whole graph can be checked
/// against device limits before any GPU memory is touched. Extents are
/// unsigned, so a negative size is unrepresentable; zero is rejected.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    /// Color the target is cleared to when its producing pass begins.
    /// `None` loads the previous contents.
    pub clear: Option<wgpu::Color>,
}

impl TargetDesc {
    /// A target of the given size in the default intermediate format (`Rgba16Float`).
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: wgpu::TextureFormat::Rgba16Float,
            clear: Some(wgpu::Color::TRANSPARENT),
        }
    }

    pub fn with_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_clear(mut self, color: wgpu::Color) -> Self {
        self.clear = Some(color);
        self
    }

    pub fn no_clear(mut self) -> Self {
        self.clear = None;
        self
    }

    /// Half the extent on each axis, rounded down but never below one pixel.
    pub fn half(&self) -> Self {
        Self {
            width: (self.width / 2).max(1),
            height: (self.height / 2).max(1),
            ..*self
        }
    }

    /// Checks the extent against `limits`.
    ///
    /// Returns [`RenderError::Allocation`] for a zero extent or one larger than
    /// `max_texture_dimension_2d`.
    pub fn validate(&self, limits: &wgpu::Limits) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::allocation(format!(
                "render target extent {}x{} is empty",
                self.width, self.height
            )));
        }
        let max = limits.max_texture_dimension_2d;
        if self.width > max || self.height > max {
            return Err(RenderError::allocation(format!(
                "render target extent {}x{} exceeds device limit {max}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Everything a pass needs to know about the surface it writes to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetInfo {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub clear: Option<wgpu::Color>,
}

impl TargetInfo {
    pub fn load_op(&self) -> wgpu::LoadOp<wgpu::Color> {
        match self.clear {
            Some(color) => wgpu::LoadOp::Clear(color),
            None => wgpu::LoadOp::Load,
        }
    }
}

impl From<&TargetDesc> for TargetInfo {
    fn from(desc: &TargetDesc) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            clear: desc.clear,
        }
    }
}

/// An off-screen render target owned by the pipeline graph.
///
/// Written by exactly one pass and sampled by any later pass. There is no
/// resize: a different size means building a new graph.
pub struct RenderTarget {
    /// The underlying GPU texture that stores pixel data.
    pub texture: wgpu::Texture,
    /// A view into the texture, used for render pass attachments and shader sampling.
    pub view: wgpu::TextureView,
    desc: TargetDesc,
}

impl RenderTarget {
    /// Validates `desc` against the device limits and allocates the texture.
    ///
    /// The texture is created with `RENDER_ATTACHMENT | TEXTURE_BINDING` usage so
    /// one pass can write it and later passes can sample it.
    pub fn allocate(gpu: &GpuContext, label: &str, desc: TargetDesc) -> RenderResult<Self> {
        desc.validate(&gpu.limits())?;

        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        debug!(
            label,
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            "allocated render target"
        );

        Ok(Self {
            texture,
            view,
            desc,
        })
    }

    pub fn desc(&self) -> &TargetDesc {
        &self.desc
    }

    pub fn info(&self) -> TargetInfo {
        TargetInfo::from(&self.desc)
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Copies the current contents back as linear RGBA, row-major.
    pub fn read_pixels(&self, gpu: &GpuContext) -> RenderResult<Vec<Vec4>> {
        readback::read_texture(gpu, &self.texture)
    }
}

/// Per-frame values shared by every pass.
///
/// Captured once when a frame starts and read-only for the rest of it, so a
/// parameter changed mid-frame shows up on the next frame for all passes at once.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameState {
    /// World-to-eye transform.
    pub view: Mat4,
    /// Elapsed time in seconds.
    pub time: f32,
    /// Eye-space z of the focal plane (negative in front of the camera).
    pub focal_dist: f32,
    /// Distance from the focal plane at which blur saturates.
    pub focal_range: f32,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            time: 0.0,
            focal_dist: -40.0,
            focal_range: 20.0,
        }
    }
}

/// Execution context passed to each render node during graph traversal.
///
/// The `'a` lifetime ties all references to the frame's scope, so nodes
/// cannot hold onto per-frame resources.
pub struct RenderContext<'a> {
    /// GPU context providing access to device, queue, and configuration.
    pub gpu: &'a GpuContext,
    /// Command encoder for recording render pass commands.
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// Frozen per-frame state.
    pub frame: &'a FrameState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extent_is_an_allocation_error() {
        let limits = wgpu::Limits::default();
        for (w, h) in [(0, 0), (0, 480), (640, 0)] {
            let err = TargetDesc::new(w, h).validate(&limits).unwrap_err();
            assert!(matches!(err, RenderError::Allocation(_)), "{w}x{h}");
        }
    }

    #[test]
    fn oversize_extent_is_an_allocation_error() {
        let limits = wgpu::Limits::default();
        let too_wide = limits.max_texture_dimension_2d + 1;
        let err = TargetDesc::new(too_wide, 4).validate(&limits).unwrap_err();
        assert!(matches!(err, RenderError::Allocation(_)));
    }

    #[test]
    fn limit_sized_extent_is_accepted() {
        let limits = wgpu::Limits::default();
        let max = limits.max_texture_dimension_2d;
        assert!(TargetDesc::new(max, 1).validate(&limits).is_ok());
        assert!(TargetDesc::new(640, 480).validate(&limits).is_ok());
    }

    #[test]
    fn half_never_collapses_to_zero() {
        let half = TargetDesc::new(640, 1).half();
        assert_eq!((half.width, half.height), (320, 1));
        assert_eq!(half.format, wgpu::TextureFormat::Rgba16Float);
    }

    #[test]
    fn load_op_follows_clear() {
        let cleared = TargetInfo::from(&TargetDesc::new(4, 4).with_clear(wgpu::Color::RED));
        assert!(matches!(cleared.load_op(), wgpu::LoadOp::Clear(_)));
        let kept = TargetInfo::from(&TargetDesc::new(4, 4).no_clear());
        assert!(matches!(kept.load_op(), wgpu::LoadOp::Load));
    }
}
