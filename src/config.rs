// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::renderer::RendererConfig;
use crate::MAX_FRAMES_IN_FLIGHT;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Core".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub max_objects: usize,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub hot_reload_shaders: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.02, 0.02, 0.05, 1.0],
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            max_objects: 1024,
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            hot_reload_shaders: false,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.graphics.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }

    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// The subset of settings the render system consumes
    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            app_name: self.window.title.clone(),
            enable_validation: self.validation_enabled(),
            present_mode: self.present_mode(),
            clear_color: self.graphics.clear_color,
            frames_in_flight: self.frames_in_flight(),
            max_objects: self.graphics.max_objects.max(1),
            vertex_shader: self.graphics.vertex_shader.clone(),
            fragment_shader: self.graphics.fragment_shader.clone(),
            hot_reload_shaders: self.graphics.hot_reload_shaders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert_eq!(config.graphics.max_objects, 1024);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert!(!config.graphics.hot_reload_shaders);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 800
            height = 600

            [graphics]
            present_mode = "FIFO"
            max_objects = 100
            "#,
        )
        .unwrap();

        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!(config.window.title, "Frame Core");
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.max_objects, 100);
        assert_eq!(
            config.graphics.vertex_shader,
            PathBuf::from("shaders/mesh.vert.spv")
        );
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let config = Config::parse("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let config = Config::parse("[graphics]\nframes_in_flight = 8").unwrap();
        assert_eq!(config.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);

        let config = Config::parse("[graphics]\nframes_in_flight = 0").unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[graphics\nmax_objects = ").is_err());
        assert!(Config::parse("[graphics]\nmax_objects = \"many\"").is_err());
    }

    #[test]
    fn renderer_config_carries_graphics_settings() {
        let config = Config::parse(
            r#"
            [window]
            title = "Demo"

            [graphics]
            clear_color = [1.0, 0.0, 0.0, 1.0]
            max_objects = 8
            "#,
        )
        .unwrap();

        let renderer = config.renderer_config();
        assert_eq!(renderer.app_name, "Demo");
        assert_eq!(renderer.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(renderer.max_objects, 8);
        assert_eq!(renderer.frames_in_flight, 3);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.graphics.present_mode, "mailbox");
    }
}
