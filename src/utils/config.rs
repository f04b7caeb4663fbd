//! Configuration management for hwdec-pipe
//!
//! This module handles loading the pipeline configuration from config
//! files and environment variables.

use crate::utils::error::{IntoPipelineError, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue and permit tuning
    pub pipeline: PipelineConfig,

    /// Decoder session settings
    pub decoder: DecoderConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Pipeline back-pressure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Loaded-but-unsubmitted compressed frames allowed in memory
    pub input_cache_frames: usize,

    /// Decoded-but-unwritten frames allowed in memory
    pub output_cache_frames: usize,

    /// Frames allowed inside the device at once
    pub hardware_buffer_slots: usize,

    /// Attempts before a rejected submission becomes fatal
    pub submit_retry_limit: u64,

    /// Delay between submission attempts in microseconds
    pub submit_retry_delay_us: u64,

    /// Orchestrator completion poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Log progress every N completion polls
    pub progress_log_every: u32,

    /// Check that completions arrive in submission order
    pub verify_completion_order: bool,
}

/// Decoder backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderBackendKind {
    /// In-process device that hands payloads straight back
    Loopback,

    /// FFmpeg software device
    Ffmpeg,
}

impl std::str::FromStr for DecoderBackendKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "loopback" => Ok(DecoderBackendKind::Loopback),
            "ffmpeg" => Ok(DecoderBackendKind::Ffmpeg),
            other => Err(PipelineError::Config(format!(
                "Unknown decoder backend '{}', expected loopback or ffmpeg",
                other
            ))),
        }
    }
}

/// Decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Device implementation to drive
    pub backend: DecoderBackendKind,

    /// Device index
    pub device_id: u32,

    /// Device node path for index 1
    pub device_node_prefix: String,

    /// Output buffers owned by the device
    pub buffer_count: usize,

    /// Artificial per-frame latency of the loopback device in microseconds
    pub loopback_latency_us: u64,
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_cache_frames: 512,
            output_cache_frames: 512,
            hardware_buffer_slots: 32,
            submit_retry_limit: 1_000_000,
            submit_retry_delay_us: 10,
            poll_interval_ms: 10,
            progress_log_every: 100,
            verify_completion_order: true,
        }
    }
}

impl PipelineConfig {
    /// Delay between submission attempts
    pub fn submit_retry_delay(&self) -> Duration {
        Duration::from_micros(self.submit_retry_delay_us)
    }

    /// Orchestrator poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate capacities and retry settings
    pub fn validate(&self) -> Result<()> {
        if self.input_cache_frames == 0
            || self.output_cache_frames == 0
            || self.hardware_buffer_slots == 0
        {
            return Err(PipelineError::Config(
                "Cache and hardware buffer capacities must be at least 1".to_string(),
            ));
        }

        if self.submit_retry_limit == 0 {
            return Err(PipelineError::Config(
                "Submit retry limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            backend: DecoderBackendKind::Loopback,
            device_id: 1,
            device_node_prefix: "/dev/mv500".to_string(),
            buffer_count: 4,
            loopback_latency_us: 0,
        }
    }
}

impl DecoderConfig {
    /// Device node for the configured index: the prefix itself for index 0
    /// and 1, `<prefix>-<id>` above that.
    pub fn device_node(&self) -> String {
        if self.device_id > 1 {
            format!("{}-{}", self.device_node_prefix, self.device_id)
        } else {
            self.device_node_prefix.clone()
        }
    }

    /// Validate session settings
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 {
            return Err(PipelineError::Config(
                "Decoder buffer count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/hwdec-pipe/config.toml)
    /// 3. User config file (~/.config/hwdec-pipe/config.toml on Linux)
    /// 4. Environment variables (HWDEC_PIPE_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::from_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load a single TOML file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).config_err("Failed to read config file")?;
        toml::from_str(&contents).config_err("Failed to parse config file")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("HWDEC_PIPE_INPUT_CACHE") {
            self.pipeline.input_cache_frames = value
                .parse()
                .map_err(|_| PipelineError::Config("Invalid HWDEC_PIPE_INPUT_CACHE".to_string()))?;
        }

        if let Ok(value) = std::env::var("HWDEC_PIPE_OUTPUT_CACHE") {
            self.pipeline.output_cache_frames = value
                .parse()
                .map_err(|_| PipelineError::Config("Invalid HWDEC_PIPE_OUTPUT_CACHE".to_string()))?;
        }

        if let Ok(value) = std::env::var("HWDEC_PIPE_HARDWARE_BUFFERS") {
            self.pipeline.hardware_buffer_slots = value.parse().map_err(|_| {
                PipelineError::Config("Invalid HWDEC_PIPE_HARDWARE_BUFFERS".to_string())
            })?;
        }

        if let Ok(value) = std::env::var("HWDEC_PIPE_DEVICE_ID") {
            self.decoder.device_id = value
                .parse()
                .map_err(|_| PipelineError::Config("Invalid HWDEC_PIPE_DEVICE_ID".to_string()))?;
        }

        if let Ok(log_level) = std::env::var("HWDEC_PIPE_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.decoder.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PipelineError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        if cfg!(unix) {
            Some(PathBuf::from("/etc/hwdec-pipe/config.toml"))
        } else {
            None
        }
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hwdec-pipe").join("config.toml"))
    }
}
