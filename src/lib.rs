//! # Refract
//!
//! **Multi-pass render graphs and texture-driven GPU instancing on wgpu.**
//!
//! Two pieces sit on top of a small fixed-order render graph:
//!
//! - [`DepthOfField`]: a five-pass depth of field. The scene is rendered sharp,
//!   rendered again at half size, blurred along X and Y by alpha-weighted
//!   kernels, and composited by each pixel's distance from the focal plane.
//! - [`InstancedDraw`]: thousands of instances in one draw call, each placing
//!   itself by reading its own texel from float data textures.
//!
//! ## Quick Start
//!
//! ```no_run
//! use refract::*;
//! use std::rc::Rc;
//!
//! let gpu = GpuContext::headless(640, 480)?;
//! let mut dof = DepthOfField::new(DofConfig::default());
//!
//! let cube = Rc::new(Mesh::new(&gpu, "Cube", &RawGeometry::cube()));
//! dof.scene_parent()
//!     .borrow_mut()
//!     .add(SceneNode::mesh(cube, Vec4::ONE));
//! dof.set_focal_point(-20.0, 10.0);
//! dof.init(&gpu)?;
//!
//! let camera = Camera::new().at(Vec3::new(0.0, 0.0, 20.0));
//! // Once per frame; `update_to_view` renders into a caller-owned texture instead.
//! dof.update(&gpu, camera.view_matrix(), 0.0)?;
//! # Ok::<(), RenderError>(())
//! ```
//!
//! Every constructor takes the [`GpuContext`] explicitly; nothing keeps GPU
//! state in globals.

pub mod app;
pub mod camera;
pub mod demo;
pub mod dof;
pub mod error;
pub mod gpu;
pub mod instanced_draw;
pub mod instancing;
pub mod mesh;
pub mod orbit_camera;
pub mod procedural;
pub mod program;
pub mod render_graph;
pub mod scene;
pub mod scene_pass;
pub mod shaders;
pub mod texture;

pub use camera::Camera;
pub use dof::{DepthOfField, DofConfig, DownsampleMode};
pub use error::{RenderError, RenderResult};
pub use gpu::GpuContext;
pub use instanced_draw::{Blend, DrawCommand, InstancedDraw, InstancedDrawDesc};
pub use instancing::{InstanceDataTexture, InstancedLayout, PlayClock, TraceParams};
pub use mesh::{Bounds, Mesh, RawGeometry, Transform, Vertex3d};
pub use orbit_camera::{OrbitCamera, OrbitMode};
pub use procedural::{StreamlineConfig, VectorFieldConfig};
pub use program::Program;
pub use render_graph::{
    FrameState, PassId, PassOutput, PipelineGraph, PipelineGraphBuilder, QuadPass, RenderNode,
    RenderTarget, TargetDesc, TargetId, UniformBlock, UniformValue,
};
pub use scene::{Scene, SceneNode};
pub use scene_pass::{Projection, ScenePass};
pub use texture::Texture;

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
