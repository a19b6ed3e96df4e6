// Camera: projection and view matrices
//
// Vulkan conventions: depth maps to 0..1 and +Y points down in clip space,
// so the default world "up" is (0, -1, 0).

use glam::{Mat4, Vec3, Vec4};

pub const DEFAULT_UP: Vec3 = Vec3::new(0.0, -1.0, 0.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    pub fn set_orthographic_projection(
        &mut self,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) {
        self.projection = Mat4::from_cols(
            Vec4::new(2.0 / (right - left), 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 / (bottom - top), 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0 / (far - near), 0.0),
            Vec4::new(
                -(right + left) / (right - left),
                -(bottom + top) / (bottom - top),
                -near / (far - near),
                1.0,
            ),
        );
    }

    /// `fovy` in radians. A zero aspect ratio leaves the projection unchanged.
    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        if aspect.abs() <= f32::EPSILON {
            log::warn!("Ignoring perspective projection with zero aspect ratio");
            return;
        }
        let tan_half_fovy = (fovy / 2.0).tan();
        self.projection = Mat4::from_cols(
            Vec4::new(1.0 / (aspect * tan_half_fovy), 0.0, 0.0, 0.0),
            Vec4::new(0.0, 1.0 / tan_half_fovy, 0.0, 0.0),
            Vec4::new(0.0, 0.0, far / (far - near), 1.0),
            Vec4::new(0.0, 0.0, -(far * near) / (far - near), 0.0),
        );
    }

    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        let w = direction.normalize();
        let u = w.cross(up).normalize();
        let v = w.cross(u);
        self.view = view_from_basis(position, u, v, w);
    }

    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// View from a position and Tait-Bryan angles applied Y, then X, then Z.
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let (s3, c3) = rotation.z.sin_cos();
        let (s2, c2) = rotation.x.sin_cos();
        let (s1, c1) = rotation.y.sin_cos();
        let u = Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1);
        let v = Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3);
        let w = Vec3::new(c2 * s1, -s2, c1 * c2);
        self.view = view_from_basis(position, u, v, w);
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Inverse of the camera's rigid transform given its orthonormal axes.
fn view_from_basis(position: Vec3, u: Vec3, v: Vec3, w: Vec3) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(u.x, v.x, w.x, 0.0),
        Vec4::new(u.y, v.y, w.y, 0.0),
        Vec4::new(u.z, v.z, w.z, 0.0),
        Vec4::new(-u.dot(position), -v.dot(position), -w.dot(position), 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_view_target_along_z_is_identity() {
        let mut camera = Camera::default();
        camera.set_view_target(Vec3::ZERO, Vec3::Z, DEFAULT_UP);
        assert!(camera.view().abs_diff_eq(Mat4::IDENTITY, EPS));
    }

    #[test]
    fn test_view_yxz_zero_is_identity() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::ZERO, Vec3::ZERO);
        assert!(camera.view().abs_diff_eq(Mat4::IDENTITY, EPS));
    }

    #[test]
    fn test_view_moves_world_opposite_to_camera() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::new(1.0, 2.0, -3.0), Vec3::ZERO);
        let p = camera.view() * Vec4::new(1.0, 2.0, -3.0, 1.0);
        assert!(p.abs_diff_eq(Vec4::new(0.0, 0.0, 0.0, 1.0), EPS));
    }

    #[test]
    fn test_view_yxz_matches_view_direction() {
        // Yaw of 90 degrees looks down +X
        let mut yxz = Camera::default();
        yxz.set_view_yxz(Vec3::new(0.5, 0.0, 1.0), Vec3::new(0.0, FRAC_PI_2, 0.0));

        let mut direction = Camera::default();
        direction.set_view_direction(Vec3::new(0.5, 0.0, 1.0), Vec3::X, DEFAULT_UP);

        assert!(yxz.view().abs_diff_eq(direction.view(), 1e-4));
    }

    #[test]
    fn test_perspective_depth_range() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(50f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);

        let near = camera.projection() * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = camera.projection() * Vec4::new(0.0, 0.0, 100.0, 1.0);
        assert!((near.z / near.w).abs() < EPS);
        assert!((far.z / far.w - 1.0).abs() < EPS);
    }

    #[test]
    fn test_perspective_zero_aspect_is_ignored() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(1.0, 0.0, 0.1, 10.0);
        assert_eq!(camera.projection(), Mat4::IDENTITY);
    }

    #[test]
    fn test_orthographic_maps_box_to_clip_volume() {
        let mut camera = Camera::default();
        camera.set_orthographic_projection(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);

        let corner = camera.projection() * Vec4::new(2.0, 1.0, 10.0, 1.0);
        assert!(corner.abs_diff_eq(Vec4::new(1.0, 1.0, 1.0, 1.0), EPS));
        let corner = camera.projection() * Vec4::new(-2.0, -1.0, 0.0, 1.0);
        assert!(corner.abs_diff_eq(Vec4::new(-1.0, -1.0, 0.0, 1.0), EPS));
    }

    #[test]
    fn test_projection_view_order() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(1.0, 1.0, 0.1, 10.0);
        camera.set_view_yxz(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO);
        assert_eq!(camera.projection_view(), camera.projection() * camera.view());
    }
}
