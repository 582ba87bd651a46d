//! Copies rendered textures back to the CPU.
//!
//! Used to inspect intermediate targets after a frame. Pixels come back as
//! linear RGBA floats in row-major order, whatever the texture stores.

use glam::Vec4;
use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

/// Reads every pixel of `texture`, blocking until the copy completes.
///
/// The texture needs `COPY_SRC` usage. Supported formats are `Rgba8Unorm`,
/// `Bgra8Unorm` (and their sRGB variants, decoded to linear), `Rgba16Float`
/// and `Rgba32Float`.
///
/// # Errors
///
/// * [`RenderError::Configuration`] for any other format
/// * [`RenderError::Device`] if mapping the staging buffer fails
pub fn read_texture(gpu: &GpuContext, texture: &wgpu::Texture) -> RenderResult<Vec<Vec4>> {
    let format = texture.format();
    let texel_bytes = texel_bytes(format).ok_or_else(|| {
        RenderError::configuration(format!("cannot read back {format:?} textures"))
    })?;
    let (width, height) = (texture.width(), texture.height());
    let row_bytes = width * texel_bytes;
    let padded_row_bytes = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size: padded_row_bytes as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row_bytes),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    gpu.device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| RenderError::device(format!("readback poll failed: {e:?}")))?;
    rx.recv()
        .map_err(|_| RenderError::device("readback channel closed"))?
        .map_err(|e| RenderError::device(format!("readback map failed: {e:?}")))?;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for row in mapped.chunks_exact(padded_row_bytes as usize) {
        pixels.extend(
            row[..row_bytes as usize]
                .chunks_exact(texel_bytes as usize)
                .map(|texel| decode(format, texel)),
        );
    }
    drop(mapped);
    staging.unmap();

    debug!(width, height, ?format, "texture read back");
    Ok(pixels)
}

fn texel_bytes(format: wgpu::TextureFormat) -> Option<u32> {
    use wgpu::TextureFormat as F;
    match format {
        F::Rgba8Unorm | F::Rgba8UnormSrgb | F::Bgra8Unorm | F::Bgra8UnormSrgb => Some(4),
        F::Rgba16Float => Some(8),
        F::Rgba32Float => Some(16),
        _ => None,
    }
}

fn decode(format: wgpu::TextureFormat, texel: &[u8]) -> Vec4 {
    use wgpu::TextureFormat as F;
    let unorm = |i: usize| texel[i] as f32 / 255.0;
    let half = |i: usize| f16_to_f32(u16::from_le_bytes([texel[i * 2], texel[i * 2 + 1]]));
    let float = |i: usize| {
        f32::from_le_bytes([texel[i * 4], texel[i * 4 + 1], texel[i * 4 + 2], texel[i * 4 + 3]])
    };
    match format {
        F::Rgba8Unorm => Vec4::new(unorm(0), unorm(1), unorm(2), unorm(3)),
        F::Bgra8Unorm => Vec4::new(unorm(2), unorm(1), unorm(0), unorm(3)),
        F::Rgba8UnormSrgb => Vec4::new(
            srgb_to_linear(unorm(0)),
            srgb_to_linear(unorm(1)),
            srgb_to_linear(unorm(2)),
            unorm(3),
        ),
        F::Bgra8UnormSrgb => Vec4::new(
            srgb_to_linear(unorm(2)),
            srgb_to_linear(unorm(1)),
            srgb_to_linear(unorm(0)),
            unorm(3),
        ),
        F::Rgba16Float => Vec4::new(half(0), half(1), half(2), half(3)),
        _ => Vec4::new(float(0), float(1), float(2), float(3)),
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// IEEE 754 binary16 to f32.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((bits >> 10) & 0x1f) as i32;
    let mantissa = (bits & 0x3ff) as f32;
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        31 if mantissa == 0.0 => sign * f32::INFINITY,
        31 => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_floats_decode() {
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0x3800), 0.5);
        assert_eq!(f16_to_f32(0xc000), -2.0);
        assert_eq!(f16_to_f32(0x4700), 7.0);
        assert_eq!(f16_to_f32(0x0001), 2f32.powi(-24));
        assert!(f16_to_f32(0x7c00).is_infinite());
        assert!(f16_to_f32(0x7e00).is_nan());
    }

    #[test]
    fn rows_pad_to_the_copy_alignment() {
        assert_eq!(align_to(64 * 8, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 512);
        assert_eq!(align_to(33 * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 256);
    }

    #[test]
    fn bgra_swizzles_and_srgb_decodes_to_linear() {
        let texel = [255u8, 0, 128, 255];
        let bgra = decode(wgpu::TextureFormat::Bgra8Unorm, &texel);
        assert_eq!(bgra.x, 128.0 / 255.0);
        assert_eq!(bgra.z, 1.0);

        let srgb = decode(wgpu::TextureFormat::Rgba8UnormSrgb, &[188, 0, 255, 255]);
        assert!((srgb.x - 0.5).abs() < 0.01, "{}", srgb.x);
        assert!((srgb.z - 1.0).abs() < 1e-5, "{}", srgb.z);
    }

    #[test]
    fn unsupported_formats_have_no_texel_size() {
        assert_eq!(texel_bytes(wgpu::TextureFormat::Depth32Float), None);
        assert_eq!(texel_bytes(wgpu::TextureFormat::Rgba16Float), Some(8));
    }
}
