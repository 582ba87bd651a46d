//! GPU-driven instancing data.
//!
//! Per-instance attributes (positions, forward axes) live in float textures
//! indexed by instance id rather than in vertex buffers. Instance `i` reads
//! the cell at column `i % W`, row `i / W` of every bound texture, so one
//! draw call can place any number of instances.
//!
//! Everything here is plain CPU data; [`InstanceDataTexture::upload`] is the
//! only GPU entry point.

use glam::{Mat3, Vec2, Vec3};
use tracing::debug;
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

/// A W x H grid of 3-component float cells, one per instance.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceDataTexture {
    width: u32,
    height: u32,
    cells: Vec<Vec3>,
}

impl InstanceDataTexture {
    /// Fills every cell with `f(x, y)`, row-major.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if either dimension is zero.
    pub fn generate(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> Vec3,
    ) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::configuration(format!(
                "instance data texture must be non-empty, got {width}x{height}"
            )));
        }
        let cells = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Wraps `cells` (row-major) as a `width` x `height` grid.
    pub fn from_cells(width: u32, height: u32, cells: Vec<Vec3>) -> RenderResult<Self> {
        if width == 0 || height == 0 || cells.len() != (width as usize) * (height as usize) {
            return Err(RenderError::configuration(format!(
                "{} cells do not fill a {width}x{height} instance data texture",
                cells.len()
            )));
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of cells, which is the instance count it can serve.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, x: u32, y: u32) -> Option<Vec3> {
        (x < self.width && y < self.height)
            .then(|| self.cells[(y * self.width + x) as usize])
    }

    pub fn cells(&self) -> &[Vec3] {
        &self.cells
    }

    /// Normalized coordinate of instance `i`: `(i mod W) / W, floor(i / W) / H`.
    ///
    /// This is the lower-left corner of the texel, so it addresses the right
    /// cell under nearest lookup. The shaders use the integer form, [`texel`](Self::texel).
    pub fn tex_coord(&self, instance: u32) -> Vec2 {
        grid_coord(instance, self.width, self.height)
    }

    /// Integer cell of instance `i`, or `None` past the end.
    pub fn texel(&self, instance: u32) -> Option<(u32, u32)> {
        ((instance as usize) < self.cells.len())
            .then(|| (instance % self.width, instance / self.width))
    }

    /// Instance `i`'s value, read through its texel.
    pub fn instance(&self, instance: u32) -> Option<Vec3> {
        self.texel(instance).and_then(|(x, y)| self.cell(x, y))
    }

    /// Uploads as an `Rgba32Float` texture (alpha 1), read with `textureLoad`.
    pub fn upload(&self, gpu: &GpuContext, label: &str) -> RenderResult<wgpu::Texture> {
        let max = gpu.limits().max_texture_dimension_2d;
        if self.width > max || self.height > max {
            return Err(RenderError::allocation(format!(
                "instance data `{label}` is {}x{}, limit is {max}",
                self.width, self.height
            )));
        }

        let texels: Vec<[f32; 4]> = self.cells.iter().map(|c| c.extend(1.0).to_array()).collect();
        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(&texels),
        );
        debug!(texture = label, width = self.width, height = self.height, "instance data uploaded");
        Ok(texture)
    }
}

/// [`InstanceDataTexture::tex_coord`] for a grid of the given size, or
/// `None` if either dimension is zero.
pub fn tex_coord(instance: u32, width: u32, height: u32) -> Option<Vec2> {
    (width > 0 && height > 0).then(|| grid_coord(instance, width, height))
}

fn grid_coord(instance: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (instance % width) as f32 / width as f32,
        (instance / width) as f32 / height as f32,
    )
}

/// Orthonormal basis whose Z axis is `forward`.
///
/// X = normalize(forward x +Z), Y = normalize(forward x X). When `forward`
/// is (anti)parallel to +Z the reference switches to +X. A zero `forward`
/// yields the identity.
pub fn orientation_basis(forward: Vec3) -> Mat3 {
    let Some(z) = forward.try_normalize() else {
        return Mat3::IDENTITY;
    };
    let reference = if z.dot(Vec3::Z).abs() > 0.999 {
        Vec3::X
    } else {
        Vec3::Z
    };
    let x = z.cross(reference).normalize();
    let y = z.cross(x).normalize();
    Mat3::from_cols(x, y, z)
}

/// Checks that every bound data texture serves exactly `count` instances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstancedLayout {
    count: u32,
    sizes: Vec<(u32, u32)>,
}

impl InstancedLayout {
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if `count` is zero, no texture is bound,
    /// or any texture's `w * h` differs from `count`.
    pub fn new(count: u32, sizes: &[(u32, u32)]) -> RenderResult<Self> {
        if count == 0 {
            return Err(RenderError::configuration("instance count must be positive"));
        }
        if sizes.is_empty() {
            return Err(RenderError::configuration(
                "instanced draw needs at least one data texture",
            ));
        }
        if let Some((i, (w, h))) = sizes
            .iter()
            .enumerate()
            .find(|(_, (w, h))| (*w as u64) * (*h as u64) != count as u64)
        {
            return Err(RenderError::configuration(format!(
                "data texture #{i} is {w}x{h} = {} cells, but {count} instances are drawn",
                (*w as u64) * (*h as u64)
            )));
        }
        Ok(Self {
            count,
            sizes: sizes.to_vec(),
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Size shared by the `sizes` uniform; the first texture's.
    pub fn sizes(&self) -> (u32, u32) {
        self.sizes[0]
    }
}

/// Streamline trace animation settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceParams {
    /// Bright heads travelling along each line.
    pub num_traces: u32,
    /// Seconds for a head to cover the gap to the next head.
    pub interval: f32,
    /// Samples over which a head's trail fades out.
    pub length: f32,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            num_traces: 5,
            interval: 1.0,
            length: 14.0,
        }
    }
}

impl TraceParams {
    pub fn with_traces(mut self, num_traces: u32) -> Self {
        self.num_traces = num_traces;
        self
    }

    pub fn with_interval(mut self, seconds: f32) -> Self {
        self.interval = seconds;
        self
    }

    pub fn with_length(mut self, samples: f32) -> Self {
        self.length = samples;
        self
    }
}

fn positive_mod(x: f32, m: f32) -> f32 {
    x - (x / m).floor() * m
}

/// Alpha of sample `index` out of `total` at time `time`.
///
/// Heads sit `total / num_traces` samples apart and move one gap per
/// `interval` seconds. A sample `d` samples behind the nearest head gets
/// `max(1 - d / length, 0)`. Without traces (or a non-positive length) every
/// sample is fully opaque; a non-positive interval freezes the heads.
pub fn trace_alpha(index: u32, total: u32, params: &TraceParams, time: f32) -> f32 {
    if params.num_traces < 1 || params.length <= 0.0 || total == 0 {
        return 1.0;
    }
    let spacing = total as f32 / params.num_traces as f32;
    let speed = if params.interval > 0.0 {
        spacing / params.interval
    } else {
        0.0
    };
    let head = positive_mod(time * speed, spacing);
    let behind = positive_mod(head - index as f32, spacing);
    (1.0 - behind / params.length).clamp(0.0, 1.0)
}

/// Animation clock with pause and speed control.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayClock {
    time: f64,
    rate: f64,
    paused: bool,
}

impl Default for PlayClock {
    fn default() -> Self {
        Self {
            time: 0.0,
            rate: 1.0,
            paused: false,
        }
    }
}

impl PlayClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances by `dt` wall-clock seconds scaled by the current rate.
    pub fn tick(&mut self, dt: f64) {
        if !self.paused {
            self.time += dt * self.rate;
        }
    }

    pub fn current_time(&self) -> f64 {
        self.time
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn speed_up(&mut self) {
        self.rate *= 4.0 / 3.0;
    }

    pub fn slow_down(&mut self) {
        self.rate *= 0.75;
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            InstanceDataTexture::generate(0, 4, |_, _| Vec3::ZERO),
            Err(RenderError::Configuration(_))
        ));
        assert!(InstanceDataTexture::from_cells(2, 2, vec![Vec3::ZERO; 3]).is_err());
    }

    #[test]
    fn layout_requires_matching_cell_counts() {
        assert!(InstancedLayout::new(16384, &[(128, 128), (128, 128)]).is_ok());
        let err = InstancedLayout::new(16384, &[(128, 128), (128, 127)]).unwrap_err();
        assert!(err.to_string().contains("#1"));
        assert!(InstancedLayout::new(0, &[(1, 1)]).is_err());
        assert!(InstancedLayout::new(4, &[]).is_err());
    }

    #[test]
    fn basis_is_orthonormal_with_forward_as_z() {
        for forward in [
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::X,
            Vec3::Z,
            Vec3::NEG_Z,
            Vec3::new(0.0, 0.001, 1.0),
        ] {
            let m = orientation_basis(forward);
            let f = forward.normalize();
            assert!((m.z_axis - f).length() < 1e-5, "{forward:?}");
            assert!(m.x_axis.dot(m.y_axis).abs() < 1e-5);
            assert!(m.x_axis.dot(m.z_axis).abs() < 1e-5);
            assert!((m.x_axis.length() - 1.0).abs() < 1e-5);
            assert!((m.y_axis.length() - 1.0).abs() < 1e-5);
        }
        assert_eq!(orientation_basis(Vec3::ZERO), Mat3::IDENTITY);
    }

    #[test]
    fn trace_heads_are_opaque_and_fade_behind() {
        let params = TraceParams::default();
        // At t = 0 the heads sit at samples 0, 51.2, 102.4, ...
        assert_eq!(trace_alpha(0, 256, &params, 0.0), 1.0);
        // Sample 249 is 7 samples behind the head at 0 (256 wraps to 0).
        let behind = trace_alpha(249, 256, &params, 0.0);
        assert!((behind - 0.5).abs() < 1e-4, "{behind}");
        assert_eq!(trace_alpha(30, 256, &params, 0.0), 0.0);
    }

    #[test]
    fn heads_advance_one_gap_per_interval() {
        let params = TraceParams::default();
        let spacing: f32 = 256.0 / 5.0;
        // Half an interval later the head has moved half a gap.
        let i = (spacing * 0.5).floor() as u32;
        assert!(trace_alpha(i, 256, &params, 0.5) > 0.9);
    }

    #[test]
    fn degenerate_trace_params_stay_finite() {
        let none = TraceParams::default().with_traces(0);
        assert_eq!(trace_alpha(3, 256, &none, 1.0), 1.0);
        let frozen = TraceParams::default().with_interval(0.0);
        assert_eq!(trace_alpha(0, 256, &frozen, 100.0), 1.0);
        let flat = TraceParams::default().with_length(0.0);
        assert_eq!(trace_alpha(9, 256, &flat, 2.0), 1.0);
    }

    #[test]
    fn clock_pauses_and_scales() {
        let mut clock = PlayClock::new();
        clock.tick(1.0);
        clock.speed_up();
        clock.tick(0.75);
        assert!((clock.current_time() - 2.0).abs() < 1e-9);
        clock.toggle_pause();
        clock.tick(5.0);
        assert!((clock.current_time() - 2.0).abs() < 1e-9);
        clock.toggle_pause();
        clock.slow_down();
        assert!((clock.rate() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tex_coord_of_an_empty_grid_is_none() {
        assert_eq!(tex_coord(3, 0, 4), None);
        assert_eq!(tex_coord(0, 4, 0), None);
        assert_eq!(tex_coord(5, 4, 2), Some(Vec2::new(0.25, 0.5)));
    }

    proptest! {
        #[test]
        fn tex_coords_are_injective(w in 1u32..300, h in 1u32..300, a in 0u32..90_000, b in 0u32..90_000) {
            let n = w * h;
            let (a, b) = (a % n, b % n);
            prop_assume!(a != b);
            prop_assert_ne!(tex_coord(a, w, h), tex_coord(b, w, h));
            prop_assert!(tex_coord(a, w, h).is_some());
        }

        #[test]
        fn texel_round_trips_the_instance_index(w in 1u32..64, h in 1u32..64, i in 0u32..4096) {
            let tex = InstanceDataTexture::generate(w, h, |x, y| Vec3::new(x as f32, y as f32, 0.0)).unwrap();
            let i = i % (w * h);
            let (x, y) = tex.texel(i).unwrap();
            prop_assert_eq!(y * w + x, i);
            prop_assert_eq!(tex.instance(i), Some(Vec3::new(x as f32, y as f32, 0.0)));
        }

        #[test]
        fn trace_alpha_is_a_unit_weight(i in 0u32..256, t in -100.0f32..100.0, traces in 0u32..10, interval in -1.0f32..5.0, len in -5.0f32..40.0) {
            let params = TraceParams { num_traces: traces, interval, length: len };
            let a = trace_alpha(i, 256, &params, t);
            prop_assert!((0.0..=1.0).contains(&a));
        }
    }
}
