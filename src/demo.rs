//! Scene content for the demo binary.
//!
//! Each builder returns scene nodes; the binary decides whether they go
//! through the depth-of-field pipeline or a single forward pass.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};
use tracing::{info, instrument, warn};

use crate::error::RenderResult;
use crate::gpu::GpuContext;
use crate::instanced_draw::{Blend, InstancedDraw, InstancedDrawDesc};
use crate::instancing::TraceParams;
use crate::mesh::{Mesh, RawGeometry, Transform};
use crate::procedural::{STREAMLINES, StreamlineConfig, VectorFieldConfig, vector_field_attitudes, vector_field_positions};
use crate::program::Program;
use crate::render_graph::{PassOutput, PipelineGraph, PipelineGraphBuilder};
use crate::scene::{Scene, SceneNode};
use crate::scene_pass::{Projection, ScenePass};
use crate::shaders;
use crate::texture::Texture;

/// Rows of spheres and boxes receding from the camera, so the focal plane
/// visibly cuts through them.
pub fn dof_showcase(gpu: &GpuContext) -> SceneNode {
    let sphere = Rc::new(Mesh::new(gpu, "Sphere", &RawGeometry::sphere(32, 16)));
    let cube = Rc::new(Mesh::new(gpu, "Cube", &RawGeometry::cube()));

    let palette = [
        Vec4::new(0.9, 0.3, 0.2, 1.0),
        Vec4::new(0.3, 0.8, 0.3, 1.0),
        Vec4::new(0.3, 0.5, 0.9, 1.0),
        Vec4::new(0.9, 0.8, 0.3, 1.0),
    ];

    let mut children = Vec::new();
    for row in 0..12 {
        let z = -5.0 * row as f32;
        for (col, x) in [-6.0f32, -2.0, 2.0, 6.0].into_iter().enumerate() {
            let color = palette[(row + col) % palette.len()];
            let (mesh, scale) = if (row + col) % 2 == 0 {
                (Rc::clone(&sphere), 2.5)
            } else {
                (Rc::clone(&cube), 2.0)
            };
            let matrix = Transform::from_position(Vec3::new(x, 0.0, z))
                .uniform_scale(scale)
                .matrix();
            children.push(SceneNode::transform(matrix, vec![SceneNode::mesh(mesh, color)]));
        }
    }
    SceneNode::Group(children)
}

/// The instanced arrow field: one draw for all `m * n` arrows.
#[instrument(skip_all, fields(m = config.m, n = config.n))]
pub fn vector_field(gpu: &GpuContext, config: &VectorFieldConfig) -> RenderResult<SceneNode> {
    let count = config.count()?;
    let (positions, attitudes) = config.textures()?;
    let arrow = Rc::new(Mesh::new(gpu, "Arrow", &RawGeometry::arrow()));
    let program = Program::new("vector field", shaders::VECTOR_FIELD_VS, shaders::SCENE_FS);

    let draw = InstancedDraw::build(
        gpu,
        InstancedDrawDesc::new("Vector Field", arrow, count, &[&positions, &attitudes], program)
            .with_color(Vec4::new(0.8, 0.8, 0.9, 1.0)),
    )?;
    Ok(SceneNode::instanced(draw))
}

/// The same field with one transform node per arrow, for comparison.
#[instrument(skip_all, fields(m = config.m, n = config.n))]
pub fn vector_field_nodes(gpu: &GpuContext, config: &VectorFieldConfig) -> RenderResult<SceneNode> {
    config.count()?;
    let arrow = Rc::new(Mesh::new(gpu, "Arrow", &RawGeometry::arrow()));
    let color = Vec4::new(0.8, 0.8, 0.9, 1.0);

    let positions = vector_field_positions(config.m, config.n, config.dx, config.dy);
    let attitudes = vector_field_attitudes(config.m, config.n);
    let children: Vec<SceneNode> = positions
        .into_iter()
        .zip(attitudes)
        .map(|(position, attitude)| {
            let matrix = Transform::from_position(position).pointing(attitude).matrix();
            SceneNode::transform(matrix, vec![SceneNode::mesh(Rc::clone(&arrow), color)])
        })
        .collect();

    info!(draws = children.len(), "per-node vector field built");
    Ok(SceneNode::Group(children))
}

/// Loads the sprite image, falling back to a generated splotch.
pub fn sprite(gpu: &GpuContext, path: Option<&std::path::Path>) -> RenderResult<Texture> {
    if let Some(path) = path {
        match Texture::from_file(gpu, path) {
            Ok(texture) => return Ok(texture),
            Err(e) => warn!(error = %e, "sprite image unavailable, using generated splotch"),
        }
    }
    Texture::splotch(gpu, 64)
}

/// Three animated streamlines of point sprites, blended over the scene.
#[instrument(skip_all, fields(width = config.width, height = config.height))]
pub fn streamlines(
    gpu: &GpuContext,
    config: &StreamlineConfig,
    trace: TraceParams,
    sprite: &Texture,
) -> RenderResult<SceneNode> {
    let count = config.count()?;
    let quad = Rc::new(Mesh::new(gpu, "Sprite", &RawGeometry::sprite_quad(config.sprite_radius)));

    let mut lines = Vec::with_capacity(STREAMLINES.len());
    for (i, (origin, color)) in STREAMLINES.iter().enumerate() {
        let positions = config.texture(*origin)?;
        let program = Program::new(format!("streamline {i}"), shaders::STREAMLINE_VS, shaders::STREAMLINE_FS);
        let draw = InstancedDraw::build(
            gpu,
            InstancedDrawDesc::new(format!("Streamline {i}"), Rc::clone(&quad), count, &[&positions], program)
                .with_sprite(sprite)
                .with_color(*color)
                .with_blend(Blend::Transparent)
                .with_trace(trace),
        )?;
        lines.push(SceneNode::instanced(draw));
    }
    Ok(SceneNode::Group(lines))
}

/// A ground plane under the streamlines so depth sorting has something to do.
pub fn ground(gpu: &GpuContext, center: Vec3, size: f32) -> SceneNode {
    let slab = Rc::new(Mesh::new(gpu, "Ground", &RawGeometry::cuboid(Vec3::new(size, 0.1, size))));
    SceneNode::transform(
        Mat4::from_translation(center - Vec3::Y * 6.0),
        vec![SceneNode::mesh(slab, Vec4::new(0.35, 0.35, 0.4, 1.0))],
    )
}

/// One scene pass straight to the frame, for content shown without blur.
pub fn forward_graph(
    gpu: &GpuContext,
    scene: Rc<RefCell<Scene>>,
    projection: Projection,
    clear: wgpu::Color,
) -> RenderResult<PipelineGraph> {
    let mut builder = PipelineGraphBuilder::new();
    builder.frame_clear(clear);
    builder.pass(ScenePass::new("forward", scene, projection), &[], PassOutput::Frame);
    builder.build(gpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_graph_plans_a_single_frame_pass() {
        let scene = Rc::new(RefCell::new(Scene::new()));
        let mut builder = PipelineGraphBuilder::new();
        builder.pass(ScenePass::new("forward", scene, Projection::default()), &[], PassOutput::Frame);
        let layout = builder.plan(&wgpu::Limits::default()).unwrap();
        assert_eq!(layout.passes.len(), 1);
        assert_eq!(layout.passes[0].output, PassOutput::Frame);
    }
}
