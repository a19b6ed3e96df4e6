// First-person keyboard movement in the XZ plane
//
// Arrow keys turn the view, WASD moves, E/Q move up and down. Pitch is
// clamped short of straight up/down; yaw wraps into [0, 2π).

use glam::Vec3;
use std::collections::HashSet;
use std::f32::consts::TAU;
use winit::event::ElementState;
use winit::keyboard::KeyCode;

use super::object::Transform;

const PITCH_LIMIT: f32 = 1.5;

/// Keys currently held down
#[derive(Debug, Default)]
pub struct InputState {
    pressed: HashSet<KeyCode>,
}

impl InputState {
    pub fn handle_key(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.pressed.insert(key);
            }
            ElementState::Released => {
                self.pressed.remove(&key);
            }
        }
    }

    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    /// Forget everything, e.g. when the window loses focus.
    pub fn clear(&mut self) {
        self.pressed.clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyMappings {
    pub move_left: KeyCode,
    pub move_right: KeyCode,
    pub move_forward: KeyCode,
    pub move_backward: KeyCode,
    pub move_up: KeyCode,
    pub move_down: KeyCode,
    pub look_left: KeyCode,
    pub look_right: KeyCode,
    pub look_up: KeyCode,
    pub look_down: KeyCode,
}

impl Default for KeyMappings {
    fn default() -> Self {
        Self {
            move_left: KeyCode::KeyA,
            move_right: KeyCode::KeyD,
            move_forward: KeyCode::KeyW,
            move_backward: KeyCode::KeyS,
            move_up: KeyCode::KeyE,
            move_down: KeyCode::KeyQ,
            look_left: KeyCode::ArrowLeft,
            look_right: KeyCode::ArrowRight,
            look_up: KeyCode::ArrowUp,
            look_down: KeyCode::ArrowDown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyboardMovementController {
    pub keys: KeyMappings,
    pub move_speed: f32,
    pub look_speed: f32,
}

impl Default for KeyboardMovementController {
    fn default() -> Self {
        Self {
            keys: KeyMappings::default(),
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }
}

impl KeyboardMovementController {
    pub fn new(move_speed: f32, look_speed: f32) -> Self {
        Self {
            move_speed,
            look_speed,
            ..Default::default()
        }
    }

    pub fn move_in_plane_xz(&self, input: &InputState, dt: f32, transform: &mut Transform) {
        let axis = |positive: KeyCode, negative: KeyCode| {
            input.is_pressed(positive) as i32 as f32 - input.is_pressed(negative) as i32 as f32
        };

        let rotate = Vec3::new(
            axis(self.keys.look_up, self.keys.look_down),
            axis(self.keys.look_right, self.keys.look_left),
            0.0,
        );
        if rotate.length_squared() > f32::EPSILON {
            transform.rotation += self.look_speed * dt * rotate.normalize();
        }

        transform.rotation.x = transform.rotation.x.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        transform.rotation.y = transform.rotation.y.rem_euclid(TAU);

        let yaw = transform.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        let up = super::camera::DEFAULT_UP;

        let movement = forward * axis(self.keys.move_forward, self.keys.move_backward)
            + right * axis(self.keys.move_right, self.keys.move_left)
            + up * axis(self.keys.move_up, self.keys.move_down);
        if movement.length_squared() > f32::EPSILON {
            transform.translation += self.move_speed * dt * movement.normalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn pressed(keys: &[KeyCode]) -> InputState {
        let mut input = InputState::default();
        for &key in keys {
            input.handle_key(key, ElementState::Pressed);
        }
        input
    }

    #[test]
    fn test_input_state_tracks_release() {
        let mut input = pressed(&[KeyCode::KeyW]);
        assert!(input.is_pressed(KeyCode::KeyW));
        input.handle_key(KeyCode::KeyW, ElementState::Released);
        assert!(!input.is_pressed(KeyCode::KeyW));
    }

    #[test]
    fn test_no_input_leaves_transform() {
        let controller = KeyboardMovementController::default();
        let mut transform = Transform::default();
        controller.move_in_plane_xz(&InputState::default(), 0.5, &mut transform);
        assert_eq!(transform, Transform::default());
    }

    #[test]
    fn test_forward_moves_along_z_at_zero_yaw() {
        let controller = KeyboardMovementController::new(2.0, 1.0);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(&pressed(&[KeyCode::KeyW]), 0.5, &mut transform);
        assert!(transform.translation.abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), EPS));
    }

    #[test]
    fn test_up_is_negative_y() {
        let controller = KeyboardMovementController::new(1.0, 1.0);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(&pressed(&[KeyCode::KeyE]), 1.0, &mut transform);
        assert!(transform.translation.abs_diff_eq(Vec3::new(0.0, -1.0, 0.0), EPS));
    }

    #[test]
    fn test_diagonal_movement_is_normalized() {
        let controller = KeyboardMovementController::new(1.0, 1.0);
        let mut transform = Transform::default();
        let input = pressed(&[KeyCode::KeyW, KeyCode::KeyD]);
        controller.move_in_plane_xz(&input, 1.0, &mut transform);
        assert!((transform.translation.length() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let controller = KeyboardMovementController::default();
        let mut transform = Transform::default();
        let input = pressed(&[KeyCode::KeyA, KeyCode::KeyD, KeyCode::ArrowLeft, KeyCode::ArrowRight]);
        controller.move_in_plane_xz(&input, 1.0, &mut transform);
        assert_eq!(transform, Transform::default());
    }

    #[test]
    fn test_pitch_is_clamped() {
        let controller = KeyboardMovementController::new(1.0, 10.0);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(&pressed(&[KeyCode::ArrowUp]), 1.0, &mut transform);
        assert_eq!(transform.rotation.x, PITCH_LIMIT);

        controller.move_in_plane_xz(&pressed(&[KeyCode::ArrowDown]), 1.0, &mut transform);
        controller.move_in_plane_xz(&pressed(&[KeyCode::ArrowDown]), 1.0, &mut transform);
        assert_eq!(transform.rotation.x, -PITCH_LIMIT);
    }

    #[test]
    fn test_yaw_wraps() {
        let controller = KeyboardMovementController::new(1.0, 1.0);
        let mut transform = Transform::default();
        controller.move_in_plane_xz(&pressed(&[KeyCode::ArrowLeft]), 0.5, &mut transform);
        assert!((transform.rotation.y - (TAU - 0.5)).abs() < 1e-4);
        assert!(transform.rotation.y >= 0.0 && transform.rotation.y < TAU);
    }

    #[test]
    fn test_right_follows_yaw() {
        let controller = KeyboardMovementController::new(1.0, 1.0);
        let mut transform = Transform {
            rotation: Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0),
            ..Default::default()
        };
        controller.move_in_plane_xz(&pressed(&[KeyCode::KeyD]), 1.0, &mut transform);
        // Facing +X, right is -Z
        assert!(transform.translation.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), EPS));
    }
}
