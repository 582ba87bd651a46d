use glam::{Mat4, Vec3};

/// A right-handed perspective camera.
///
/// The view matrix looks down `forward`; eye-space depth is negative in
/// front of the camera, so a focal distance of -40 means 40 units ahead.
/// The projection maps depth to wgpu's 0..1 range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: 50f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn looking_at(mut self, target: Vec3) -> Self {
        self.forward = (target - self.position).normalize_or(Vec3::NEG_Z);
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        perspective(self.fov, aspect, self.near, self.far)
    }
}

/// Right-handed perspective with a 0..1 depth range. Degenerate inputs are
/// nudged so the matrix stays finite.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let near = near.max(1e-4);
    let far = far.max(near * 1.001);
    let aspect = if aspect > 0.0 { aspect } else { 1.0 };
    Mat4::perspective_rh(fov_y.clamp(1e-3, std::f32::consts::PI - 1e-3), aspect, near, far)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_ahead_have_negative_eye_z() {
        let cam = Camera::new().at(Vec3::new(0.0, 0.0, 10.0)).looking_at(Vec3::ZERO);
        let eye = cam.view_matrix().transform_point3(Vec3::new(0.0, 0.0, -30.0));
        assert!((eye.z - -40.0).abs() < 1e-4);
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let proj = Camera::new().with_clip(0.1, 100.0).projection_matrix(4.0 / 3.0);
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -0.1));
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -100.0));
        assert!(near.z.abs() < 1e-4);
        assert!((far.z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn degenerate_projection_stays_finite() {
        let proj = perspective(0.0, 0.0, 0.0, 0.0);
        assert!(proj.is_finite());
    }
}
