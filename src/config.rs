// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section has defaults, so a missing file or a missing key never stops
// the renderer from starting. Values that would break an invariant (zero
// frames in flight, a zero-sized window) are rejected by `validate`.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::RenderError;

/// Upper bound on frames in flight; the per-image fence table assumes a small K.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetConfig,
    pub scene: SceneConfig,
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
            title: "Vulkan Mesh Renderer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is the fallback when unsupported.
    pub present_mode: String,
    pub frames_in_flight: usize,
    /// Upper bound for the multisample count.
    pub msaa_samples: u32,
    pub depth_test: bool,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            frames_in_flight: 2,
            msaa_samples: 4,
            depth_test: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Shader blobs and model files
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// OBJ files to load at startup. Empty means the built-in demo mesh.
    pub models: Vec<PathBuf>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            models: Vec::new(),
        }
    }
}

/// Camera and animation
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub rotation_speed_degrees: f32,
    pub camera_eye: [f32; 3],
    pub fov_degrees: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            rotation_speed_degrees: 90.0,
            camera_eye: [2.0, 2.0, 2.0],
            fov_degrees: 45.0,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds.
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
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
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let frames = self.graphics.frames_in_flight;
        if frames == 0 || frames > MAX_FRAMES_IN_FLIGHT {
            return Err(RenderError::InvalidConfig(format!(
                "graphics.frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, frames
            ))
            .into());
        }
        if !self.graphics.msaa_samples.is_power_of_two() || self.graphics.msaa_samples > 64 {
            return Err(RenderError::InvalidConfig(format!(
                "graphics.msaa_samples must be a power of two up to 64, got {}",
                self.graphics.msaa_samples
            ))
            .into());
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(RenderError::InvalidConfig("window size must be non-zero".into()).into());
        }
        if !(1.0..180.0).contains(&self.scene.fov_degrees) {
            return Err(RenderError::InvalidConfig(format!(
                "scene.fov_degrees must be in [1, 180), got {}",
                self.scene.fov_degrees
            ))
            .into());
        }
        Ok(())
    }

    /// Get the preferred present mode as Vulkan enum
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
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

    /// Multisample upper bound as Vulkan flags
    pub fn msaa_limit(&self) -> vk::SampleCountFlags {
        vk::SampleCountFlags::from_raw(self.graphics.msaa_samples)
    }

    /// Validation layers are a debug-build feature only
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}
