// Scene - objects, camera and camera control
//
// Pure math and bookkeeping; nothing here touches Vulkan apart from the
// shared model handle on GameObject.

pub mod camera;
pub mod controller;
pub mod object;

pub use camera::Camera;
pub use controller::{InputState, KeyboardMovementController};
pub use object::{GameObject, GameObjectIds, Transform};
