//! Mesh geometry: CPU-side builders and GPU-resident buffers.
//!
//! Geometry is built on the CPU as [`RawGeometry`] (testable without a device)
//! and uploaded once into a [`Mesh`]:
//!
//! ```ignore
//! let arrow = Mesh::new(&gpu, "arrow", &RawGeometry::arrow());
//! let sprite = Mesh::new(&gpu, "sprite", &RawGeometry::sprite_quad(0.5));
//! ```
//!
//! # Vertex Layout
//!
//! [`Vertex3d`] is 32 bytes:
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | normal    | Float32x3 | 12     | 1               |
//! | uv        | Float32x2 | 24     | 2               |
//!
//! All primitives wind front faces counter-clockwise.

use glam::{Mat4, Quat, Vec3};
use wgpu::util::DeviceExt;

use crate::gpu::GpuContext;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2],
    };

    /// Shader locations provided by [`Self::LAYOUT`].
    pub const LOCATIONS: [u32; 3] = [0, 1, 2];

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box around `points`, or `None` if there are none.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Self::new(p, p),
                Some(b) => Self::new(b.min.min(p), b.max.max(p)),
            })
        })
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Bounds of this box's eight corners after `matrix`.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = (0..8).map(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            matrix.transform_point3(corner)
        });
        // Eight corners always yield a box.
        Self::from_points(corners).unwrap_or(*self)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Radius of the bounding sphere around [`center`](Self::center).
    pub fn radius(&self) -> f32 {
        (self.max - self.min).length() * 0.5
    }
}

/// Triangle-list geometry before upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawGeometry {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl RawGeometry {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(self.vertices.iter().map(|v| Vec3::from(v.position)))
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Unit cube centered at the origin. 24 vertices so each face has flat normals.
    pub fn cube() -> Self {
        Self::cuboid(Vec3::ONE)
    }

    /// Box centered at the origin with the given edge lengths.
    pub fn cuboid(size: Vec3) -> Self {
        let h = size * 0.5;
        // (normal, u axis, v axis) per face; corners are n*h -/+ u*h -/+ v*h.
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in faces {
            let base = vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = (normal + u * su + v * sv) * h;
                vertices.push(Vertex3d::new(
                    p.to_array(),
                    normal.to_array(),
                    [(su + 1.0) * 0.5, (1.0 - sv) * 0.5],
                ));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        Self::new(vertices, indices)
    }

    /// UV sphere of radius 0.5 centered at the origin.
    ///
    /// `(segments + 1) * (rings + 1)` vertices, `segments * rings * 2` triangles.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let (ring_radius, y) = phi.sin_cos();
            for seg in 0..=segments {
                let theta = std::f32::consts::TAU * seg as f32 / segments as f32;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                vertices.push(Vertex3d::new(
                    (normal * 0.5).to_array(),
                    normal.to_array(),
                    [seg as f32 / segments as f32, ring as f32 / rings as f32],
                ));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;
                indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }
        Self::new(vertices, indices)
    }

    /// Arrow of length 1 pointing along +Z from the origin.
    ///
    /// A four-sided shaft (0.05 across, 0.65 long) and a four-sided pyramid
    /// head (0.075 across). 22 vertices: 10 for the shaft strip, 12 for the
    /// head's four triangles.
    pub fn arrow() -> Self {
        const SHAFT: f32 = 0.05;
        const HEAD: f32 = 0.075;
        const LENGTH: f32 = 1.0;
        const HEAD_START: f32 = 0.65;

        let mut vertices = Vec::with_capacity(22);
        let sides = [
            Vec3::X,
            Vec3::NEG_Y,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::X,
        ];
        for (i, side) in sides.into_iter().enumerate() {
            let u = i as f32 / 4.0;
            let p = side * SHAFT;
            vertices.push(Vertex3d::new(p.to_array(), side.to_array(), [u, 0.0]));
            vertices.push(Vertex3d::new(
                (p + Vec3::Z * HEAD_START).to_array(),
                side.to_array(),
                [u, HEAD_START],
            ));
        }

        let mut indices = Vec::with_capacity(36);
        for quad in 0..4u32 {
            let a = quad * 2;
            indices.extend_from_slice(&[a, a + 1, a + 2, a + 2, a + 1, a + 3]);
        }

        let tip = Vec3::Z * LENGTH;
        let rim = [
            Vec3::new(HEAD, -HEAD, HEAD_START),
            Vec3::new(HEAD, HEAD, HEAD_START),
            Vec3::new(-HEAD, HEAD, HEAD_START),
            Vec3::new(-HEAD, -HEAD, HEAD_START),
        ];
        for k in 0..4 {
            let (a, b) = (rim[k], rim[(k + 1) % 4]);
            let normal = (b - a).cross(tip - a).normalize();
            let base = vertices.len() as u32;
            for (p, uv) in [(a, [0.0, 0.0]), (b, [1.0, 0.0]), (tip, [0.5, 1.0])] {
                vertices.push(Vertex3d::new(p.to_array(), normal.to_array(), uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2]);
        }

        Self::new(vertices, indices)
    }

    /// Camera-facing sprite corners: a square of half-size `radius` in XY,
    /// offset in eye space by the sprite shader. uv (0, 0) is the lower left.
    pub fn sprite_quad(radius: f32) -> Self {
        let r = radius;
        let n = [0.0, 0.0, 1.0];
        let vertices = vec![
            Vertex3d::new([-r, -r, 0.0], n, [0.0, 0.0]),
            Vertex3d::new([r, -r, 0.0], n, [1.0, 0.0]),
            Vertex3d::new([-r, r, 0.0], n, [0.0, 1.0]),
            Vertex3d::new([r, r, 0.0], n, [1.0, 1.0]),
        ];
        Self::new(vertices, vec![0, 1, 2, 2, 1, 3])
    }
}

/// GPU-resident geometry. Immutable once uploaded.
#[derive(Debug)]
pub struct Mesh {
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) index_buffer: wgpu::Buffer,
    pub(crate) index_count: u32,
    bounds: Option<Bounds>,
}

impl Mesh {
    pub fn new(gpu: &GpuContext, label: &str, geometry: &RawGeometry) -> Self {
        let vertex_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Vertices")),
                contents: bytemuck::cast_slice(&geometry.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Indices")),
                contents: bytemuck::cast_slice(&geometry.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: geometry.indices.len() as u32,
            bounds: geometry.bounds(),
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Binds the buffers and draws `instances` copies.
    pub fn draw(&self, pass: &mut wgpu::RenderPass, instances: std::ops::Range<u32>) {
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, instances);
    }
}

/// Position, rotation and scale, applied scale first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Rotation taking +Z onto `direction`.
    pub fn pointing(self, direction: Vec3) -> Self {
        self.rotation(Quat::from_rotation_arc(Vec3::Z, direction.normalize_or(Vec3::Z)))
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
