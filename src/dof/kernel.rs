//! CPU reference for the depth-of-field shaders.
//!
//! The WGSL in `shaders/` and these functions compute the same thing; tests
//! check the math here without a GPU, and the pipeline builds its uniform
//! blocks from the constants below.

use glam::{Vec3, Vec4};

use crate::render_graph::{UniformBlock, UniformValue};

/// Tap distances from the centre, in full-resolution texels. Inner three
/// first, then outer three.
pub const TAP_OFFSETS: [f32; 6] = [1.3366, 3.4295, 5.4264, 7.4395, 9.4436, 11.4401];

/// Horizontal pass: a tap contributes `clamp(alpha - threshold, 0, 1)`.
pub const H_CENTER_THRESHOLD: f32 = -0.01;
pub const H_THRESHOLDS: [f32; 6] = [0.1, 0.3, 0.5, 0.6, 0.7, 0.8];

/// Vertical pass: fixed per-tap weights on premultiplied color.
pub const V_CENTER_WEIGHT: f32 = 0.100;
pub const V_WEIGHTS: [f32; 6] = [0.080, 0.075, 0.070, 0.065, 0.060, 0.055];

/// Weight sums at or below this produce transparent black instead of dividing.
pub const EPSILON: f32 = 1e-6;

/// Normalized distance from the focal plane: 0 in focus, 1 fully blurred.
///
/// A non-positive `range` makes this a step that is 0 only exactly at
/// `focal_dist`.
pub fn blur_factor(eye_z: f32, focal_dist: f32, range: f32) -> f32 {
    let distance = (eye_z - focal_dist).abs();
    if range <= 0.0 {
        return if distance == 0.0 { 0.0 } else { 1.0 };
    }
    (distance / range).clamp(0.0, 1.0)
}

/// The 13 samples one output pixel reads along a blur axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Taps {
    pub center: Vec4,
    /// `(uv + offset_k, uv - offset_k)` for each [`TAP_OFFSETS`] entry.
    pub pairs: [(Vec4, Vec4); 6],
}

impl Taps {
    /// All 13 samples equal to `value`.
    pub fn uniform(value: Vec4) -> Self {
        Self {
            center: value,
            pairs: [(value, value); 6],
        }
    }
}

/// Threshold-weighted average. Alpha of the result is the weight sum.
pub fn horizontal_blur(taps: &Taps) -> Vec4 {
    let weight = |tap: Vec4, threshold: f32| (tap.w - threshold).clamp(0.0, 1.0);

    let w = weight(taps.center, H_CENTER_THRESHOLD);
    let mut color = taps.center.truncate() * w;
    let mut total = w;
    for ((ahead, behind), threshold) in taps.pairs.iter().zip(H_THRESHOLDS) {
        let (wa, wb) = (weight(*ahead, threshold), weight(*behind, threshold));
        color += ahead.truncate() * wa + behind.truncate() * wb;
        total += wa + wb;
    }

    if total <= EPSILON {
        return Vec4::ZERO;
    }
    (color / total).extend(total)
}

/// Fixed-weight average of premultiplied color, normalized by accumulated alpha.
pub fn vertical_blur(taps: &Taps) -> Vec4 {
    let premultiplied = |tap: Vec4| (tap.truncate() * tap.w).extend(tap.w);

    let mut sum = premultiplied(taps.center) * V_CENTER_WEIGHT;
    for ((ahead, behind), weight) in taps.pairs.iter().zip(V_WEIGHTS) {
        sum += (premultiplied(*ahead) + premultiplied(*behind)) * weight;
    }

    if sum.w <= EPSILON {
        return Vec4::ZERO;
    }
    (sum.truncate() / sum.w).extend(sum.w)
}

/// Mixes sharp toward soft by the sharp pixel's blur factor. Output is opaque.
pub fn composite(sharp: Vec4, soft: Vec4) -> Vec4 {
    let t = sharp.w.clamp(0.0, 1.0);
    sharp.truncate().lerp(soft.truncate(), t).extend(1.0)
}

/// Packs six per-tap values and a centre value as `array<vec4f, 2>`:
/// inner taps in `[0].xyz`, centre in `[0].w`, outer taps in `[1].xyz`.
pub fn pack_taps(values: [f32; 6], center: f32) -> UniformValue {
    UniformValue::Vec4Array(vec![
        [values[0], values[1], values[2], center],
        [values[3], values[4], values[5], 0.0],
    ])
}

/// One tap step in uv units along an axis `full` texels long.
///
/// Offsets are measured in texels of the focused image even though the blur
/// runs at reduced resolution. `spread` scales the step; 1 is the reference
/// kernel and 0 collapses every tap onto the centre.
pub fn blur_texel(full: u32, spread: f32) -> f32 {
    spread / full.max(1) as f32
}

/// Uniforms of the horizontal pass over an image `full_width` texels wide.
pub fn blur_x_uniforms(full_width: u32, spread: f32) -> UniformBlock {
    UniformBlock::new()
        .with("texel", [blur_texel(full_width, spread), 0.0])
        .with("offsets", pack_taps(TAP_OFFSETS, 0.0))
        .with("thresholds", pack_taps(H_THRESHOLDS, H_CENTER_THRESHOLD))
}

pub fn blur_y_uniforms(full_height: u32, spread: f32) -> UniformBlock {
    UniformBlock::new()
        .with("texel", [0.0, blur_texel(full_height, spread)])
        .with("offsets", pack_taps(TAP_OFFSETS, 0.0))
        .with("weights", pack_taps(V_WEIGHTS, V_CENTER_WEIGHT))
}

/// Color of a lit surface under the eye-space headlight.
pub fn headlight(color: Vec3, eye_normal: Vec3) -> Vec3 {
    const AMBIENT: f32 = 0.1;
    let diffuse = eye_normal.normalize_or_zero().dot(Vec3::Z).max(0.0);
    color * (AMBIENT + (1.0 - AMBIENT) * diffuse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn focus_weights_match_the_focal_plane() {
        assert_eq!(blur_factor(-20.0, -20.0, 10.0), 0.0);
        assert_eq!(blur_factor(-40.0, -20.0, 10.0), 1.0);
        assert_eq!(blur_factor(-25.0, -20.0, 10.0), 0.5);
        assert_eq!(blur_factor(-15.0, -20.0, 10.0), 0.5);
    }

    #[test]
    fn zero_range_is_a_step() {
        assert_eq!(blur_factor(-20.0, -20.0, 0.0), 0.0);
        assert_eq!(blur_factor(-20.001, -20.0, 0.0), 1.0);
        assert_eq!(blur_factor(5.0, -20.0, -3.0), 1.0);
    }

    #[test]
    fn all_sharp_taps_leave_only_the_centre() {
        let mut taps = Taps::uniform(Vec4::new(0.0, 0.0, 1.0, 0.0));
        taps.center = Vec4::new(1.0, 0.0, 0.0, 0.0);
        let out = horizontal_blur(&taps);
        // Only the centre's -0.01 threshold passes alpha 0.
        assert!((out.truncate() - Vec3::X).length() < 1e-6);
        assert!((out.w - 0.01).abs() < 1e-6);
    }

    #[test]
    fn zero_weight_produces_zero_not_nan() {
        let dark = Taps::uniform(Vec4::new(0.3, 0.3, 0.3, 0.0));
        let v = vertical_blur(&dark);
        assert_eq!(v, Vec4::ZERO);

        let mut below = Taps::uniform(Vec4::new(1.0, 1.0, 1.0, -1.0));
        below.center.w = -1.0;
        assert_eq!(horizontal_blur(&below), Vec4::ZERO);
    }

    #[test]
    fn flat_blurred_field_is_preserved() {
        let grey = Vec4::new(0.4, 0.5, 0.6, 1.0);
        let h = horizontal_blur(&Taps::uniform(grey));
        assert!((h.truncate() - grey.truncate()).length() < 1e-5);
        let v = vertical_blur(&Taps::uniform(h));
        assert!((v.truncate() - grey.truncate()).length() < 1e-5);
    }

    #[test]
    fn packing_matches_shader_indexing() {
        let UniformValue::Vec4Array(packed) = pack_taps(TAP_OFFSETS, 9.0) else {
            panic!("expected an array");
        };
        for k in 0..6 {
            assert_eq!(packed[k / 3][k % 3], TAP_OFFSETS[k]);
        }
        assert_eq!(packed[0][3], 9.0);
    }

    #[test]
    fn blur_uniform_blocks_are_eighty_bytes() {
        assert_eq!(blur_x_uniforms(640, 1.0).byte_size(), 80);
        assert_eq!(blur_y_uniforms(480, 1.0).byte_size(), 80);
        assert_eq!(
            blur_x_uniforms(640, 1.0).get("texel"),
            Some(&UniformValue::Vec2([1.0 / 640.0, 0.0]))
        );
        assert_eq!(
            blur_y_uniforms(480, 2.0).get("texel"),
            Some(&UniformValue::Vec2([0.0, 2.0 / 480.0]))
        );
        assert_eq!(blur_texel(0, 1.0), 1.0);
    }

    #[test]
    fn headlight_keeps_ambient_when_facing_away() {
        let lit = headlight(Vec3::ONE, Vec3::Z);
        let unlit = headlight(Vec3::ONE, Vec3::NEG_Z);
        assert!((lit - Vec3::ONE).length() < 1e-6);
        assert!((unlit - Vec3::splat(0.1)).length() < 1e-6);
    }

    proptest! {
        #[test]
        fn blend_weight_is_monotonic_and_saturates(
            focal in -100.0f32..0.0,
            range in 0.01f32..50.0,
            d1 in 0.0f32..200.0,
            d2 in 0.0f32..200.0,
        ) {
            let (near, far) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
            let a = blur_factor(focal - near, focal, range);
            let b = blur_factor(focal - far, focal, range);
            prop_assert!((0.0..=1.0).contains(&a));
            prop_assert!(a <= b);
            if far >= range * 1.01 + 0.01 {
                prop_assert_eq!(b, 1.0);
            }
        }

        #[test]
        fn composite_stays_between_inputs(
            s in prop::array::uniform4(0.0f32..1.0),
            b in prop::array::uniform3(0.0f32..1.0),
        ) {
            let sharp = Vec4::from_array(s);
            let soft = Vec3::from_array(b);
            let out = composite(sharp, soft.extend(0.0));
            prop_assert_eq!(out.w, 1.0);
            for i in 0..3 {
                let (lo, hi) = (sharp[i].min(soft[i]), sharp[i].max(soft[i]));
                prop_assert!(out[i] >= lo - 1e-6 && out[i] <= hi + 1e-6);
            }
        }

        #[test]
        fn blur_outputs_are_finite(
            c in prop::array::uniform4(-2.0f32..2.0),
            e in prop::array::uniform4(-2.0f32..2.0),
        ) {
            let mut taps = Taps::uniform(Vec4::from_array(e));
            taps.center = Vec4::from_array(c);
            prop_assert!(horizontal_blur(&taps).is_finite());
            prop_assert!(vertical_blur(&taps).is_finite());
        }
    }
}
