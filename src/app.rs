// =============================================================================
// APPLICATION - window, input and the per-frame loop
// =============================================================================
//
// FRAME FLOW:
// 1. Poll shader watcher (rebuild pipeline if SPIR-V changed)
// 2. Move the viewer from keyboard state, update camera
// 3. begin_frame -> write this slot's UBO -> render pass -> draw -> end_frame
//
// All GPU objects live in RenderState, created once the event loop resumes.
// Its Drop waits for the device to go idle before anything is destroyed.

use anyhow::{Context, Result};
use ash::vk;
use glam::Vec3;
use gpu_allocator::MemoryLocation;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::backend::buffer::Buffer;
use crate::backend::descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use crate::backend::image::Texture;
use crate::backend::VulkanDevice;
use crate::config::{parse_key_code, Config};
use crate::frame::FrameInfo;
use crate::hot_reload::ShaderWatcher;
use crate::model::Model;
use crate::renderer::Renderer;
use crate::scene::{
    Camera, GameObject, GameObjectIds, InputState, KeyboardMovementController, Transform,
};
use crate::systems::{BasicRenderSystem, GlobalUbo};

/// Everything that needs a device. Field order is drop order.
struct RenderState {
    game_objects: Vec<GameObject>,
    render_system: BasicRenderSystem,
    global_sets: Vec<vk::DescriptorSet>,
    ubo_buffers: Vec<Buffer>,
    _texture: Texture,
    _global_pool: DescriptorPool,
    _global_layout: DescriptorSetLayout,
    renderer: Renderer,
    shader_watcher: Option<ShaderWatcher>,
    camera: Camera,
    viewer: Transform,
    controller: KeyboardMovementController,
    device: Arc<VulkanDevice>,
}

impl RenderState {
    fn new(config: &Config, window: Arc<Window>) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let device = VulkanDevice::new(
            &config.window.title,
            config.debug.validation_layers,
            window,
        )?;
        let renderer = Renderer::new(device.clone(), config)?;
        let frames = renderer.frames_in_flight() as u32;

        let global_pool = DescriptorPool::builder()
            .max_sets(frames * 2)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, frames)
            .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, frames * 2)
            .build(&device)?;

        let global_layout = DescriptorSetLayout::builder()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                1,
            )?
            .add_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )?
            .build(&device)?;

        let texture = match &config.scene.texture {
            Some(path) => Texture::from_file(device.clone(), path)?,
            None => Texture::solid(device.clone(), [255, 255, 255, 255])?,
        };

        let min_alignment = device.properties.limits.min_uniform_buffer_offset_alignment;
        let ubo_buffers = (0..frames)
            .map(|i| {
                Buffer::new(
                    device.clone(),
                    &format!("global ubo {}", i),
                    size_of::<GlobalUbo>() as vk::DeviceSize,
                    1,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    min_alignment,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let global_sets = ubo_buffers
            .iter()
            .map(|buffer| {
                DescriptorWriter::new(&global_layout, &global_pool)
                    .write_buffer(0, buffer.descriptor_info())?
                    .write_image(1, texture.descriptor_info())?
                    .build()?
                    .context("Global descriptor pool exhausted")
            })
            .collect::<Result<Vec<_>>>()?;

        let render_system = BasicRenderSystem::new(
            device.clone(),
            renderer.render_pass(),
            global_layout.layout,
            &config.scene.vertex_shader,
            &config.scene.fragment_shader,
        )?;

        let model = Arc::new(Model::from_file(device.clone(), &config.scene.model)?);
        let mut ids = GameObjectIds::default();
        let mut object = GameObject::with_model(&mut ids, model);
        object.transform.translation = Vec3::new(0.0, 0.0, 2.5);

        let shader_watcher = if config.debug.hot_reload_shaders {
            let directory = config
                .scene
                .vertex_shader
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            match ShaderWatcher::new(directory) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            game_objects: vec![object],
            render_system,
            global_sets,
            ubo_buffers,
            _texture: texture,
            _global_pool: global_pool,
            _global_layout: global_layout,
            renderer,
            shader_watcher,
            camera: Camera::default(),
            viewer: Transform::default(),
            controller: KeyboardMovementController::new(
                config.controls.move_speed,
                config.controls.look_speed,
            ),
            device,
        })
    }

    /// Record and present one frame. Returns false if nothing was drawn.
    fn draw_frame(&mut self, config: &Config, input: &InputState, frame_time: f32) -> Result<bool> {
        if self
            .shader_watcher
            .as_ref()
            .is_some_and(|watcher| watcher.take_changed())
        {
            self.reload_shaders()?;
        }

        self.controller
            .move_in_plane_xz(input, frame_time, &mut self.viewer);
        self.camera
            .set_view_yxz(self.viewer.translation, self.viewer.rotation);

        let Some(command_buffer) = self.renderer.begin_frame()? else {
            return Ok(false);
        };
        let frame_index = self.renderer.frame_index()?;

        // After begin_frame, which may have resized the swapchain
        self.camera.set_perspective_projection(
            config.scene.fov_degrees.to_radians(),
            self.renderer.aspect_ratio(),
            config.scene.near,
            config.scene.far,
        );

        let ubo = GlobalUbo {
            projection_view: self.camera.projection_view(),
            ..Default::default()
        };
        self.ubo_buffers[frame_index].write_to_buffer(bytemuck::bytes_of(&ubo))?;

        let frame_info = FrameInfo {
            frame_index,
            frame_time,
            command_buffer,
            camera: &self.camera,
            global_descriptor_set: self.global_sets[frame_index],
        };

        self.renderer.begin_render_pass(command_buffer)?;
        self.render_system
            .render_game_objects(&frame_info, &self.game_objects);
        self.renderer.end_render_pass(command_buffer)?;
        self.renderer.end_frame()?;

        Ok(true)
    }

    fn reload_shaders(&mut self) -> Result<()> {
        log::info!("Shader change detected, rebuilding pipeline");
        self.device.wait_idle()?;
        if let Err(e) = self.render_system.rebuild_pipeline(self.renderer.render_pass()) {
            log::error!("Keeping previous pipeline: {:#}", e);
        }
        Ok(())
    }
}

impl Drop for RenderState {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {:?}", e);
        }
    }
}

pub struct App {
    config: Config,
    window: Option<Arc<Window>>,
    state: Option<RenderState>,
    input: InputState,
    fullscreen_key: KeyCode,
    quit_key: KeyCode,
    is_fullscreen: bool,
    is_minimized: bool,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let fullscreen_key = key_or_default(&config.controls.fullscreen_key, KeyCode::F11);
        let quit_key = key_or_default(&config.controls.quit_key, KeyCode::Escape);
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();

        Self {
            config,
            window: None,
            state: None,
            input: InputState::default(),
            fullscreen_key,
            quit_key,
            is_fullscreen,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(state) = self.state.as_mut() {
                state.renderer.mark_resized();
            }
        }
    }

    fn update_fps(&mut self, now: Instant, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();

        // Update title every second
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen {
                    "fullscreen"
                } else {
                    "windowed"
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        if self.is_minimized {
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };

        match state.draw_frame(&self.config, &self.input, frame_time) {
            Ok(true) => self.update_fps(now, frame_time),
            Ok(false) => {}
            Err(e) => {
                log::error!("Render error: {:?}", e);
                event_loop.exit();
            }
        }
    }
}

fn key_or_default(name: &str, default: KeyCode) -> KeyCode {
    parse_key_code(name).unwrap_or_else(|| {
        log::warn!("Unknown key '{}', using {:?}", name, default);
        default
    })
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match RenderState::new(&self.config, window.clone()) {
            Ok(state) => self.state = Some(state),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
        self.last_frame_time = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                self.is_minimized = size.width == 0 || size.height == 0;
                if let Some(state) = self.state.as_mut() {
                    state.renderer.mark_resized();
                }
            }

            WindowEvent::Focused(false) => self.input.clear(),

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                self.input.handle_key(key, event.state);

                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                if key == self.quit_key {
                    log::info!("{:?} pressed, exiting...", key);
                    event_loop.exit();
                } else if key == self.fullscreen_key {
                    self.toggle_fullscreen();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // GPU objects must go before the window they present to
        self.state = None;
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_fall_back() {
        assert_eq!(key_or_default("NotAKey", KeyCode::F11), KeyCode::F11);
        assert_eq!(key_or_default("q", KeyCode::Escape), KeyCode::KeyQ);
    }

    #[test]
    fn test_app_reads_controls() {
        let config = Config::from_toml_str("[controls]\nquit_key = \"Q\"\n").unwrap();
        let app = App::new(config);
        assert_eq!(app.quit_key, KeyCode::KeyQ);
        assert_eq!(app.fullscreen_key, KeyCode::F11);
        assert!(app.state.is_none());
    }
}
