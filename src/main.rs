// =============================================================================
// SPECTRA - entry point
// =============================================================================

use anyhow::Result;
use spectra::app::App;
use spectra::config::{Config, CONFIG_PATH};
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use winit::event_loop::EventLoop;

fn main() -> Result<()> {
    let (config, load_error) = Config::load();

    init_logging(&config);
    log::info!("Starting Spectra");
    match load_error {
        Some(e) => log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e),
        None if std::path::Path::new(CONFIG_PATH).exists() => {
            log::info!("Loaded configuration from {}", CONFIG_PATH)
        }
        None => log::info!("Config file not found at {}, using defaults", CONFIG_PATH),
    }
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Level comes from the config file; RUST_LOG still overrides it.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let level = LevelFilter::from_str(&config.debug.log_level).unwrap_or(LevelFilter::Info);
    let mut builder = Builder::new();
    builder.filter_level(level).parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Spectra Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Cannot open log file {}: {}, logging to stderr",
                config.debug.log_file, e
            ),
        }
    }

    builder.init();
}
