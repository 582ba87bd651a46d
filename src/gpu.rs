//! Core GPU context and device management.
//!
//! [`GpuContext`] owns the wgpu device and queue and, when rendering to a window,
//! the surface. It is passed explicitly to every pipeline construction and frame
//! call; nothing in the crate keeps GPU state in globals.
//!
//! Two constructors exist:
//!
//! - [`GpuContext::new`] for a winit window (surface-backed, presents frames)
//! - [`GpuContext::headless`] for off-screen rendering and tests
//!
//! Both return [`RenderError::Device`] instead of panicking when no adapter or
//! device is available, so callers can skip GPU work on machines without one.

use std::sync::Arc;

use tracing::info;
use winit::window::Window;

use crate::error::{RenderError, RenderResult};

/// Core GPU context holding wgpu resources.
///
/// All fields are public to allow direct access to wgpu APIs when needed.
pub struct GpuContext {
    /// The surface for presenting rendered frames, `None` when headless.
    pub surface: Option<wgpu::Surface<'static>>,
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Current output configuration (format and size). Headless contexts keep
    /// one too so passes can target the same format either way.
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Create a new GPU context from a winit window.
    ///
    /// Picks an sRGB surface format and Fifo present mode.
    pub fn new(window: Arc<Window>) -> RenderResult<Self> {
        let size = window.inner_size();
        let instance = Self::instance();

        let surface = instance
            .create_surface(window)
            .map_err(|e| RenderError::device(format!("failed to create surface: {e}")))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::device(format!("no gpu adapter available: {e}")))?;

        let (device, queue) = Self::request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| RenderError::device("surface reports no formats"))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        info!(
            adapter = %adapter.get_info().name,
            format = ?surface_format,
            width = config.width,
            height = config.height,
            "gpu context ready"
        );

        Ok(Self {
            surface: Some(surface),
            device,
            queue,
            config,
        })
    }

    /// Create a context with no surface, for off-screen rendering.
    ///
    /// `width` and `height` describe the nominal output size; frames are
    /// rendered into caller-provided texture views.
    pub fn headless(width: u32, height: u32) -> RenderResult<Self> {
        let instance = Self::instance();

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::device(format!("no gpu adapter available: {e}")))?;

        let (device, queue) = Self::request_device(&adapter)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        info!(adapter = %adapter.get_info().name, "headless gpu context ready");

        Ok(Self {
            surface: None,
            device,
            queue,
            config,
        })
    }

    fn instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        })
    }

    fn request_device(adapter: &wgpu::Adapter) -> RenderResult<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Refract Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| RenderError::device(format!("failed to create device: {e}")))
    }

    /// Resize the surface to new dimensions.
    ///
    /// Ignores zero-sized dimensions (window minimize). Render graph targets are
    /// fixed-size and are not touched.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            if let Some(surface) = &self.surface {
                surface.configure(&self.device, &self.config);
            }
        }
    }

    /// Device limits, used to validate render target sizes before allocation.
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Returns the current output width in pixels.
    pub fn width(&self) -> u32 {
        self.config.width
    }

    /// Returns the current output height in pixels.
    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns the current aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }
}
