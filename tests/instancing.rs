use glam::{Vec2, Vec3};
use proptest::prelude::*;
use std::collections::HashSet;

use refract::instancing::{self, InstanceDataTexture, InstancedLayout, TraceParams, trace_alpha};
use refract::procedural::VectorFieldConfig;
use refract::RenderError;

fn generator(x: u32, y: u32) -> Vec3 {
    Vec3::new(x as f32 * 1.5, y as f32 * 1.5, (x * 1000 + y) as f32)
}

#[test]
fn sixteen_thousand_instances_keep_their_own_cells() {
    let texture = InstanceDataTexture::generate(128, 128, generator).unwrap();
    assert_eq!(texture.len(), 16384);

    assert_eq!(texture.cell(0, 0), Some(generator(0, 0)));
    assert_eq!(texture.cell(127, 127), Some(generator(127, 127)));
    assert_eq!(texture.cell(128, 0), None);

    // Every cell holds a distinct value, so no two instances alias.
    let distinct: HashSet<u32> = texture.cells().iter().map(|v| v.z as u32).collect();
    assert_eq!(distinct.len(), 16384);

    // The last instance reads the last cell.
    assert_eq!(texture.texel(16383), Some((127, 127)));
    assert_eq!(texture.instance(16383), Some(generator(127, 127)));
}

#[test]
fn count_mismatch_is_a_configuration_error() {
    let err = InstancedLayout::new(16383, &[(128, 128)]).unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));

    let err = InstancedLayout::new(16384, &[(128, 128), (64, 256), (128, 64)]).unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));

    assert!(InstancedLayout::new(16384, &[(128, 128), (64, 256)]).is_ok());
}

#[test]
fn vector_field_textures_cover_the_grid() {
    let config = VectorFieldConfig::default();
    let (positions, attitudes) = config.textures().unwrap();
    let count = config.count().unwrap();
    assert_eq!(positions.len() as u32, count);
    assert_eq!(attitudes.len() as u32, count);
    assert!(InstancedLayout::new(count, &[(128, 128), (128, 128)]).is_ok());
    for attitude in attitudes.cells() {
        assert!((attitude.length() - 1.0).abs() < 1e-4);
    }
}

#[test]
fn trace_heads_are_fully_opaque() {
    let params = TraceParams::default();
    // Five heads over 250 samples, 50 apart, at rest at t = 0.
    for head in [0, 50, 100, 150, 200] {
        assert_eq!(trace_alpha(head, 250, &params, 0.0), 1.0);
    }
    assert_eq!(trace_alpha(25, 250, &params, 0.0), 0.0);
}

proptest! {
    #[test]
    fn tex_coords_are_injective(w in 1u32..48, h in 1u32..48) {
        let mut seen = HashSet::new();
        for i in 0..w * h {
            let uv: Vec2 = instancing::tex_coord(i, w, h).unwrap();
            prop_assert_eq!(uv, Vec2::new((i % w) as f32 / w as f32, (i / w) as f32 / h as f32));
            prop_assert!(seen.insert((uv.x.to_bits(), uv.y.to_bits())));
        }
    }
}
