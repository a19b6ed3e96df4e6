//! Spectra - a small forward renderer on raw Vulkan.
//!
//! ```text
//! App (winit event loop, input, camera)
//!  └── Renderer (frame lifecycle, swapchain recreation)
//!        ├── FrameCycle (pure frame state)
//!        └── backend (device, swapchain, sync, buffers, images, pipelines)
//! ```

pub mod app;
pub mod backend;
pub mod config;
pub mod frame;
pub mod hot_reload;
pub mod model;
pub mod renderer;
pub mod scene;
pub mod systems;
