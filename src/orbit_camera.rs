use glam::Vec3;

use crate::camera::Camera;
use crate::mesh::Bounds;

/// How the orbit camera moves between ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum OrbitMode {
    /// Holds still.
    #[default]
    Fixed,
    /// Rotates around the target.
    AutoRotate {
        /// Radians per second, counterclockwise seen from +Y.
        speed: f32,
    },
}

/// A camera controller that orbits a target point.
///
/// The demos have no input handling, so the only motion is auto-rotation.
///
/// # Example
/// ```ignore
/// let mut orbit = OrbitCamera::new()
///     .mode(OrbitMode::AutoRotate { speed: 0.2 })
///     .home(&scene.bounds().unwrap());
///
/// // each tick:
/// orbit.update(dt);
/// dof.update(&gpu, orbit.camera().view_matrix(), time)?;
/// ```
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    /// Horizontal angle in radians.
    pub azimuth: f32,
    /// Vertical angle in radians, kept away from the poles.
    pub elevation: f32,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub mode: OrbitMode,
}

const MAX_ELEVATION: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 5.0,
            azimuth: 0.0,
            elevation: 0.3,
            fov: 50f32.to_radians(),
            mode: OrbitMode::Fixed,
        }
    }
}

impl OrbitCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: impl Into<Vec3>) -> Self {
        self.target = target.into();
        self
    }

    pub fn distance(mut self, distance: f32) -> Self {
        self.distance = distance.max(0.01);
        self
    }

    pub fn mode(mut self, mode: OrbitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn azimuth(mut self, azimuth: f32) -> Self {
        self.azimuth = azimuth;
        self
    }

    pub fn elevation(mut self, elevation: f32) -> Self {
        self.elevation = elevation.clamp(-MAX_ELEVATION, MAX_ELEVATION);
        self
    }

    /// Frames `bounds`: targets its center from far enough back that the
    /// bounding sphere fits the vertical field of view.
    pub fn home(mut self, bounds: &Bounds) -> Self {
        self.target = bounds.center();
        let radius = bounds.radius().max(0.01);
        self.distance = radius / (self.fov * 0.5).sin().max(1e-3);
        self
    }

    pub fn update(&mut self, dt: f32) {
        if let OrbitMode::AutoRotate { speed } = self.mode {
            self.azimuth = (self.azimuth + speed * dt) % std::f32::consts::TAU;
        }
    }

    pub fn camera(&self) -> Camera {
        let offset = Vec3::new(
            self.distance * self.elevation.cos() * self.azimuth.sin(),
            self.distance * self.elevation.sin(),
            self.distance * self.elevation.cos() * self.azimuth.cos(),
        );
        let position = self.target + offset;

        Camera {
            position,
            forward: (self.target - position).normalize_or(Vec3::NEG_Z),
            fov: self.fov,
            ..Camera::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_keeps_the_target_at_the_computed_distance() {
        let bounds = Bounds::new(Vec3::splat(-1.0), Vec3::splat(3.0));
        let orbit = OrbitCamera::new().home(&bounds);
        let cam = orbit.camera();
        assert_eq!(orbit.target, Vec3::ONE);
        assert!(((cam.position - orbit.target).length() - orbit.distance).abs() < 1e-4);
        assert!(orbit.distance > bounds.radius());
    }

    #[test]
    fn fixed_mode_ignores_time() {
        let mut orbit = OrbitCamera::new();
        let before = orbit.camera();
        orbit.update(10.0);
        assert_eq!(orbit.camera(), before);
    }

    #[test]
    fn auto_rotate_advances_azimuth() {
        let mut orbit = OrbitCamera::new().mode(OrbitMode::AutoRotate { speed: 0.5 });
        orbit.update(1.0);
        assert!((orbit.azimuth - 0.5).abs() < 1e-6);
    }
}
