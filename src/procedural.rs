//! Procedural instance data for the vector field and streamline demos.

use glam::{Vec3, Vec4};

use crate::error::{RenderError, RenderResult};
use crate::instancing::InstanceDataTexture;

/// An m x n grid of arrows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorFieldConfig {
    pub m: u32,
    pub n: u32,
    pub dx: f32,
    pub dy: f32,
}

impl Default for VectorFieldConfig {
    fn default() -> Self {
        Self {
            m: 128,
            n: 128,
            dx: 1.5,
            dy: 1.5,
        }
    }
}

impl VectorFieldConfig {
    pub fn with_grid(mut self, m: u32, n: u32) -> Self {
        self.m = m;
        self.n = n;
        self
    }

    pub fn with_spacing(mut self, dx: f32, dy: f32) -> Self {
        self.dx = dx;
        self.dy = dy;
        self
    }

    /// Number of arrows, `m * n`.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if the product overflows `u32`.
    pub fn count(&self) -> RenderResult<u32> {
        checked_count(self.m, self.n, "vector field grid")
    }
}

/// Sample layout shared by every streamline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamlineConfig {
    /// Data texture width; samples per line are `width * height`.
    pub width: u32,
    pub height: u32,
    /// Distance between consecutive samples along X.
    pub spacing: f32,
    /// Half-size of each point sprite.
    pub sprite_radius: f32,
}

impl Default for StreamlineConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 1,
            spacing: 0.25,
            sprite_radius: 0.5,
        }
    }
}

impl StreamlineConfig {
    pub fn with_samples(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_spacing(mut self, spacing: f32) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_sprite_radius(mut self, radius: f32) -> Self {
        self.sprite_radius = radius;
        self
    }

    /// Samples per streamline, `width * height`.
    pub fn count(&self) -> RenderResult<u32> {
        checked_count(self.width, self.height, "streamline samples")
    }
}

/// Origins and colors of the three demo streamlines.
pub const STREAMLINES: [(Vec3, Vec4); 3] = [
    (Vec3::new(0.0, 0.0, 0.0), Vec4::new(0.6, 0.4, 1.0, 1.0)),
    (Vec3::new(1.0, -3.0, 0.5), Vec4::new(1.0, 0.7, 0.5, 1.0)),
    (Vec3::new(-0.5, 2.0, -0.5), Vec4::new(0.5, 1.0, 0.6, 1.0)),
];

/// Arrow base points, `(i * dx, j * dy, 0)` with `i` outer and `j` inner.
pub fn vector_field_positions(m: u32, n: u32, dx: f32, dy: f32) -> Vec<Vec3> {
    grid(m, n)
        .map(|(i, j)| Vec3::new(i as f32 * dx, j as f32 * dy, 0.0))
        .collect()
}

/// Unit arrow directions swirling outward from the grid origin.
///
/// With `d = sqrt(i² + j²) / m * 2`, the direction is
/// `(sin(-dπ), cos(dπ), sin(dπ))` normalized, or +Z where that is near zero.
pub fn vector_field_attitudes(m: u32, n: u32) -> Vec<Vec3> {
    grid(m, n)
        .map(|(i, j)| {
            let d = (i as f32).hypot(j as f32) / m as f32 * 2.0;
            let angle = d * std::f32::consts::PI;
            let v = Vec3::new((-angle).sin(), angle.cos(), angle.sin());
            if v.length_squared() < 1e-4 {
                Vec3::Z
            } else {
                v.normalize()
            }
        })
        .collect()
}

/// One streamline: `(ox + i * dx, oy, oz + 4 sin(i / count * 2π))`.
pub fn streamline_positions(origin: Vec3, width: u32, height: u32, dx: f32) -> Vec<Vec3> {
    let count = u64::from(width) * u64::from(height);
    (0..count)
        .map(|i| {
            let phase = i as f32 / count as f32 * std::f32::consts::TAU;
            origin + Vec3::new(i as f32 * dx, 0.0, 4.0 * phase.sin())
        })
        .collect()
}

impl VectorFieldConfig {
    /// Position and attitude textures, each `m` x `n`.
    pub fn textures(&self) -> RenderResult<(InstanceDataTexture, InstanceDataTexture)> {
        self.count()?;
        let positions = InstanceDataTexture::from_cells(
            self.m,
            self.n,
            vector_field_positions(self.m, self.n, self.dx, self.dy),
        )?;
        let attitudes =
            InstanceDataTexture::from_cells(self.m, self.n, vector_field_attitudes(self.m, self.n))?;
        Ok((positions, attitudes))
    }
}

impl StreamlineConfig {
    pub fn texture(&self, origin: Vec3) -> RenderResult<InstanceDataTexture> {
        self.count()?;
        InstanceDataTexture::from_cells(
            self.width,
            self.height,
            streamline_positions(origin, self.width, self.height, self.spacing),
        )
    }
}

fn checked_count(a: u32, b: u32, what: &str) -> RenderResult<u32> {
    a.checked_mul(b).ok_or_else(|| {
        RenderError::configuration(format!("{what} of {a}x{b} exceeds {} instances", u32::MAX))
    })
}

fn grid(m: u32, n: u32) -> impl Iterator<Item = (u32, u32)> {
    (0..m).flat_map(move |i| (0..n).map(move |j| (i, j)))
}
