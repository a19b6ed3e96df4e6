// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is `#[serde(default)]`, so a partial file only overrides the
// keys it names. A missing or broken file falls back to defaults.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use winit::keyboard::KeyCode;

/// Upper bound for `graphics.max_frames_in_flight`.
pub const FRAMES_IN_FLIGHT_LIMIT: usize = 3;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
    pub scene: SceneConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Spectra".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.1, 0.1, 0.1, 1.0],
            max_frames_in_flight: crate::backend::swapchain::MAX_FRAMES_IN_FLIGHT,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
    pub hot_reload_shaders: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "spectra.log".to_string(),
            show_fps: true,
            hot_reload_shaders: false,
        }
    }
}

/// Control key bindings and camera speeds
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
    pub move_speed: f32,
    pub look_speed: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }
}

/// What gets loaded and how it is viewed
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub model: PathBuf,
    pub texture: Option<PathBuf>,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/cube.obj"),
            texture: None,
            vertex_shader: PathBuf::from("shaders/shader.vert.spv"),
            fragment_shader: PathBuf::from("shaders/shader.frag.spv"),
            fov_degrees: 50.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Config file read at startup, relative to the working directory.
pub const CONFIG_PATH: &str = "config.toml";

impl Config {
    /// Load `config.toml`, falling back to defaults.
    ///
    /// Runs before logging is set up, so a load failure is handed back for
    /// the caller to report instead of being logged here.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default(CONFIG_PATH)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path. A missing file is not an
    /// error and yields the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Requested present mode, or `None` when the name is not recognised.
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
            _ => None,
        }
    }

    /// Present mode to ask the swapchain for. Unknown names fall back to FIFO.
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode().unwrap_or_else(|| {
            log::warn!(
                "Unknown present mode '{}', defaulting to FIFO",
                self.graphics.present_mode
            );
            vk::PresentModeKHR::FIFO
        })
    }

    /// Frames in flight, clamped to `1..=FRAMES_IN_FLIGHT_LIMIT`.
    pub fn frames_in_flight(&self) -> usize {
        self.graphics
            .max_frames_in_flight
            .clamp(1, FRAMES_IN_FLIGHT_LIMIT)
    }
}

/// Map a key name from the config file to a winit key code.
pub fn parse_key_code(name: &str) -> Option<KeyCode> {
    let key = match name.to_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f5" => KeyCode::F5,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "q" => KeyCode::KeyQ,
        "p" => KeyCode::KeyP,
        "f" => KeyCode::KeyF,
        "r" => KeyCode::KeyR,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.scene.model, PathBuf::from("models/cube.obj"));
        assert!(config.scene.texture.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1920

            [scene]
            texture = "textures/checker.png"
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 600);
        assert_eq!(
            config.scene.texture,
            Some(PathBuf::from("textures/checker.png"))
        );
        assert_eq!(config.scene.fov_degrees, 50.0);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
    }

    #[test]
    fn test_broken_file_reports_error_and_uses_defaults() {
        let path = std::env::temp_dir().join(format!("spectra-broken-{}.toml", std::process::id()));
        std::fs::write(&path, "[window\nwidth = 1920\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        let error = error.expect("parse failure should be reported");
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("spectra-does-not-exist.toml");
        let (config, error) = Config::load_or_default(&path);
        assert!(error.is_none());
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn test_present_mode_parsing() {
        let mut config = Config::default();
        config.graphics.present_mode = "FIFO_relaxed".to_string();
        assert_eq!(
            config.present_mode(),
            Some(vk::PresentModeKHR::FIFO_RELAXED)
        );

        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.present_mode(), None);
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_frames_in_flight_is_clamped() {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = 0;
        assert_eq!(config.frames_in_flight(), 1);
        config.graphics.max_frames_in_flight = 8;
        assert_eq!(config.frames_in_flight(), FRAMES_IN_FLIGHT_LIMIT);
        config.graphics.max_frames_in_flight = 2;
        assert_eq!(config.frames_in_flight(), 2);
    }

    #[test]
    fn test_parse_key_code() {
        assert_eq!(parse_key_code("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key_code("f11"), Some(KeyCode::F11));
        assert_eq!(parse_key_code("hyper"), None);
    }
}
