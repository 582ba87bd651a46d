use std::path::Path;

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

/// A sampled color texture, such as a point-sprite image.
#[derive(Debug)]
pub struct Texture {
    #[allow(dead_code)]
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    /// Uploads tightly packed RGBA8 pixels.
    pub fn from_rgba(
        gpu: &GpuContext,
        data: &[u8],
        width: u32,
        height: u32,
        label: &str,
    ) -> RenderResult<Self> {
        let max = gpu.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::allocation(format!(
                "texture `{label}` is {width}x{height}, limit is {max}"
            )));
        }
        if data.len() != (width * height * 4) as usize {
            return Err(RenderError::configuration(format!(
                "texture `{label}` has {} bytes, expected {}",
                data.len(),
                width * height * 4
            )));
        }

        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label} Sampler")),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        debug!(texture = label, width, height, "texture uploaded");
        Ok(Self {
            texture,
            view,
            sampler,
            width,
            height,
        })
    }

    /// Loads an image file.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResourceMissing`] if the file cannot be read or decoded.
    pub fn from_file(gpu: &GpuContext, path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|e| {
                let source = match e {
                    image::ImageError::IoError(io) => io,
                    other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
                };
                RenderError::resource_missing(path, source)
            })?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba(gpu, &img, width, height, &path.display().to_string())
    }

    /// A soft round sprite: white, alpha falling from 1 at the center to 0 at the edge.
    pub fn splotch(gpu: &GpuContext, size: u32) -> RenderResult<Self> {
        Self::from_rgba(gpu, &splotch_pixels(size), size, size, "Splotch")
    }
}

/// RGBA8 pixels of a radial falloff with smoothstep edges.
pub fn splotch_pixels(size: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    let half = size as f32 * 0.5;
    for y in 0..size {
        for x in 0..size {
            let dx = (x as f32 + 0.5 - half) / half;
            let dy = (y as f32 + 0.5 - half) / half;
            let t = (1.0 - (dx * dx + dy * dy).sqrt()).clamp(0.0, 1.0);
            let alpha = t * t * (3.0 - 2.0 * t);
            data.extend_from_slice(&[255, 255, 255, (alpha * 255.0).round() as u8]);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splotch_is_opaque_in_the_middle_and_clear_at_the_corners() {
        let size = 32;
        let px = splotch_pixels(size);
        assert_eq!(px.len(), (size * size * 4) as usize);
        let alpha = |x: u32, y: u32| px[((y * size + x) * 4 + 3) as usize];
        assert!(alpha(16, 16) > 240);
        assert_eq!(alpha(0, 0), 0);
        assert_eq!(alpha(size - 1, size - 1), 0);
    }
}
