// Render systems record draw commands into the frame's render pass

pub mod basic;

pub use basic::{BasicRenderSystem, GlobalUbo};
