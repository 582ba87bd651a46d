//! The scene tree drawn by a [`ScenePass`](crate::scene_pass::ScenePass).
//!
//! Nodes are a closed set of variants and traversal is a plain `match`:
//! [`Scene::visit`] walks the leaves with their accumulated model matrices,
//! and [`Scene::collect_draws`] flattens them into a reusable list of
//! [`DrawItem`]s.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};

use crate::instanced_draw::InstancedDraw;
use crate::mesh::{Bounds, Mesh};

pub enum SceneNode {
    Group(Vec<SceneNode>),
    Transform {
        matrix: Mat4,
        children: Vec<SceneNode>,
    },
    Mesh {
        mesh: Rc<Mesh>,
        color: Vec4,
    },
    /// Many instances placed by data textures, drawn with one call.
    Instanced(Rc<RefCell<InstancedDraw>>),
}

impl SceneNode {
    pub fn mesh(mesh: Rc<Mesh>, color: Vec4) -> Self {
        Self::Mesh { mesh, color }
    }

    pub fn transform(matrix: Mat4, children: Vec<SceneNode>) -> Self {
        Self::Transform { matrix, children }
    }

    pub fn instanced(draw: InstancedDraw) -> Self {
        Self::Instanced(Rc::new(RefCell::new(draw)))
    }
}

/// What a draw item draws.
#[derive(Clone)]
pub enum DrawKind {
    Mesh { mesh: Rc<Mesh>, color: Vec4 },
    Instanced(Rc<RefCell<InstancedDraw>>),
}

/// One draw with its world transform.
#[derive(Clone)]
pub struct DrawItem {
    pub model: Mat4,
    pub kind: DrawKind,
}

#[derive(Default)]
pub struct Scene {
    roots: Vec<SceneNode>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: SceneNode) {
        self.roots.push(node);
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = SceneNode>) {
        self.roots.extend(nodes);
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }

    /// True if traversal would produce no draws.
    pub fn is_empty(&self) -> bool {
        self.roots.iter().all(SceneNode::draws_nothing)
    }

    /// Calls `f` with every mesh and instanced leaf and its world transform,
    /// depth-first, parents before children.
    pub fn visit(&self, mut f: impl FnMut(Mat4, &SceneNode)) {
        for node in &self.roots {
            walk(node, Mat4::IDENTITY, &mut f);
        }
    }

    /// Replaces `items` with the flattened draw list, reusing its allocation.
    pub fn collect_draws(&self, items: &mut Vec<DrawItem>) {
        items.clear();
        self.visit(|model, leaf| {
            let kind = match leaf {
                SceneNode::Mesh { mesh, color } => DrawKind::Mesh {
                    mesh: Rc::clone(mesh),
                    color: *color,
                },
                SceneNode::Instanced(draw) => DrawKind::Instanced(Rc::clone(draw)),
                SceneNode::Group(_) | SceneNode::Transform { .. } => return,
            };
            items.push(DrawItem { model, kind });
        });
    }

    /// Every instanced draw in the tree, once each.
    pub fn instanced_draws(&self) -> Vec<Rc<RefCell<InstancedDraw>>> {
        let mut draws: Vec<Rc<RefCell<InstancedDraw>>> = Vec::new();
        self.visit(|_, leaf| {
            if let SceneNode::Instanced(draw) = leaf
                && !draws.iter().any(|d| Rc::ptr_eq(d, draw))
            {
                draws.push(Rc::clone(draw));
            }
        });
        draws
    }

    /// World-space bounds of everything drawn.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut total: Option<Bounds> = None;
        self.visit(|model, leaf| {
            let local = match leaf {
                SceneNode::Mesh { mesh, .. } => mesh.bounds(),
                SceneNode::Instanced(draw) => draw.borrow().bounds(),
                SceneNode::Group(_) | SceneNode::Transform { .. } => None,
            };
            if let Some(local) = local {
                let world = local.transformed(&model);
                total = Some(match total {
                    Some(acc) => acc.union(&world),
                    None => world,
                });
            }
        });
        total
    }

    /// Center of [`bounds`](Self::bounds), or the origin for an empty scene.
    pub fn center(&self) -> Vec3 {
        self.bounds().map_or(Vec3::ZERO, |b| b.center())
    }
}

impl SceneNode {
    fn draws_nothing(&self) -> bool {
        match self {
            Self::Group(children) | Self::Transform { children, .. } => {
                children.iter().all(Self::draws_nothing)
            }
            Self::Mesh { .. } | Self::Instanced(_) => false,
        }
    }
}

fn walk<F: FnMut(Mat4, &SceneNode)>(node: &SceneNode, parent: Mat4, f: &mut F) {
    match node {
        SceneNode::Group(children) => {
            for child in children {
                walk(child, parent, f);
            }
        }
        SceneNode::Transform { matrix, children } => {
            let model = parent * *matrix;
            for child in children {
                walk(child, model, f);
            }
        }
        SceneNode::Mesh { .. } | SceneNode::Instanced(_) => f(parent, node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_groups_produce_no_draws() {
        let mut scene = Scene::new();
        assert!(scene.is_empty());
        scene.add(SceneNode::Group(vec![SceneNode::transform(
            Mat4::IDENTITY,
            vec![],
        )]));
        assert!(scene.is_empty());
        assert!(scene.bounds().is_none());
        assert_eq!(scene.center(), Vec3::ZERO);
    }
}
