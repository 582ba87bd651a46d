//! Depth-of-field behavior checked against the CPU reference of the shaders.

use glam::{Vec3, Vec4};
use proptest::prelude::*;

use refract::dof::kernel::{Taps, blur_factor, composite, horizontal_blur, vertical_blur};
use refract::{DepthOfField, DofConfig};

#[test]
fn focal_plane_at_minus_twenty_with_range_ten() {
    let mut dof = DepthOfField::new(DofConfig::default());
    dof.set_focal_point(-20.0, 10.0);
    let (dist, range) = (dof.focal_dist(), dof.focal_range());

    assert_eq!(blur_factor(-20.0, dist, range), 0.0);
    assert_eq!(blur_factor(-25.0, dist, range), 0.5);
    assert_eq!(blur_factor(-40.0, dist, range), 1.0);
    assert_eq!(blur_factor(-400.0, dist, range), 1.0);
}

#[test]
fn in_focus_pixels_composite_to_the_sharp_image() {
    let sharp = Vec4::new(0.9, 0.2, 0.1, blur_factor(-20.0, -20.0, 10.0));
    let soft = Vec4::new(0.1, 0.1, 0.1, 1.0);
    assert_eq!(composite(sharp, soft), Vec4::new(0.9, 0.2, 0.1, 1.0));
}

#[test]
fn fully_blurred_pixels_composite_to_the_blurred_image() {
    let sharp = Vec4::new(0.9, 0.2, 0.1, blur_factor(-40.0, -20.0, 10.0));
    let soft = Vec4::new(0.1, 0.3, 0.5, 0.7);
    let out = composite(sharp, soft);
    assert!((out.truncate() - Vec3::new(0.1, 0.3, 0.5)).length() < 1e-6);
    assert_eq!(out.w, 1.0);
}

#[test]
fn sharp_neighbors_do_not_bleed_into_the_blur() {
    // A blurred pixel next to in-focus red taps: red has alpha 0 and falls
    // under every outer threshold.
    let mut taps = Taps::uniform(Vec4::new(1.0, 0.0, 0.0, 0.0));
    taps.center = Vec4::new(0.0, 0.0, 1.0, 1.0);
    let h = horizontal_blur(&taps);
    assert!((h.truncate() - Vec3::Z).length() < 1e-6);
}

#[test]
fn both_blur_passes_are_defined_when_no_tap_contributes() {
    let nothing = Taps::uniform(Vec4::new(0.5, 0.5, 0.5, 0.0));
    let h = horizontal_blur(&Taps {
        center: Vec4::new(0.5, 0.5, 0.5, -0.01),
        ..nothing
    });
    assert_eq!(h, Vec4::ZERO);
    assert_eq!(vertical_blur(&nothing), Vec4::ZERO);
}

proptest! {
    #[test]
    fn focal_dist_round_trips(d in -1.0e9f32..1.0e9) {
        let mut dof = DepthOfField::new(DofConfig::default());
        dof.set_focal_dist(d);
        prop_assert_eq!(dof.focal_dist(), d);
    }

    #[test]
    fn blend_weight_matches_the_formula(z in -500.0f32..10.0, focal in -100.0f32..-1.0, range in 0.1f32..100.0) {
        let expected = ((z - focal).abs() / range).clamp(0.0, 1.0);
        prop_assert_eq!(blur_factor(z, focal, range), expected);
    }
}
