use glam::{Mat3, Mat4, Vec3, Vec4};
use std::sync::Arc;

use crate::model::Model;

/// Translation, non-uniform scale and Tait-Bryan rotation (radians, Y-X-Z)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub scale: Vec3,
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Vec3::ZERO,
        }
    }
}

impl Transform {
    /// Rotation basis shared by `mat4` and `normal_matrix`.
    fn rotation_columns(&self) -> [Vec3; 3] {
        let (s3, c3) = self.rotation.z.sin_cos();
        let (s2, c2) = self.rotation.x.sin_cos();
        let (s1, c1) = self.rotation.y.sin_cos();
        [
            Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1),
            Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3),
            Vec3::new(c2 * s1, -s2, c1 * c2),
        ]
    }

    /// Translate * Ry * Rx * Rz * Scale, written out in closed form.
    pub fn mat4(&self) -> Mat4 {
        let [x, y, z] = self.rotation_columns();
        Mat4::from_cols(
            (x * self.scale.x).extend(0.0),
            (y * self.scale.y).extend(0.0),
            (z * self.scale.z).extend(0.0),
            Vec4::from((self.translation, 1.0)),
        )
    }

    /// Inverse transpose of the model matrix's upper 3x3.
    pub fn normal_matrix(&self) -> Mat3 {
        let [x, y, z] = self.rotation_columns();
        let inverse_scale = self.scale.recip();
        Mat3::from_cols(x * inverse_scale.x, y * inverse_scale.y, z * inverse_scale.z)
    }
}

pub type GameObjectId = u32;

/// Hands out unique object ids.
#[derive(Debug, Default)]
pub struct GameObjectIds {
    next: GameObjectId,
}

impl GameObjectIds {
    pub fn next_id(&mut self) -> GameObjectId {
        let id = self.next;
        self.next += 1;
        id
    }
}

pub struct GameObject {
    id: GameObjectId,
    pub model: Option<Arc<Model>>,
    pub color: Vec3,
    pub transform: Transform,
}

impl GameObject {
    pub fn new(ids: &mut GameObjectIds) -> Self {
        Self {
            id: ids.next_id(),
            model: None,
            color: Vec3::ONE,
            transform: Transform::default(),
        }
    }

    pub fn with_model(ids: &mut GameObjectIds, model: Arc<Model>) -> Self {
        Self {
            model: Some(model),
            ..Self::new(ids)
        }
    }

    pub fn id(&self) -> GameObjectId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn reference(transform: &Transform) -> Mat4 {
        Mat4::from_translation(transform.translation)
            * Mat4::from_rotation_y(transform.rotation.y)
            * Mat4::from_rotation_x(transform.rotation.x)
            * Mat4::from_rotation_z(transform.rotation.z)
            * Mat4::from_scale(transform.scale)
    }

    fn sample() -> Transform {
        Transform {
            translation: Vec3::new(1.0, -2.0, 3.5),
            scale: Vec3::new(2.0, 0.5, 3.0),
            rotation: Vec3::new(0.3, -1.2, 2.1),
        }
    }

    #[test]
    fn test_identity_transform() {
        let transform = Transform::default();
        assert!(transform.mat4().abs_diff_eq(Mat4::IDENTITY, EPS));
        assert!(transform.normal_matrix().abs_diff_eq(Mat3::IDENTITY, EPS));
    }

    #[test]
    fn test_mat4_matches_composed_rotations() {
        let transform = sample();
        assert!(transform.mat4().abs_diff_eq(reference(&transform), EPS));
    }

    #[test]
    fn test_normal_matrix_is_inverse_transpose() {
        let transform = sample();
        let expected = Mat3::from_mat4(transform.mat4()).inverse().transpose();
        assert!(transform.normal_matrix().abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut ids = GameObjectIds::default();
        let a = GameObject::new(&mut ids);
        let b = GameObject::new(&mut ids);
        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
        assert_eq!(b.color, Vec3::ONE);
        assert!(b.model.is_none());
    }
}
