//! TOML configuration for the camera server.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path that replies with a one-shot JPEG image
    #[serde(default = "default_capture_path")]
    pub capture_path: String,

    /// Path that plays continuous Motion-JPEG frames
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Path that prompts remote command execution
    #[serde(default = "default_prompt_path")]
    pub prompt_path: String,

    /// Value of the informational X-Framerate header
    #[serde(default = "default_framerate_hint")]
    pub framerate_hint: u32,

    /// Bounded wait for the sensor gate on streaming sends (milliseconds)
    #[serde(default = "default_stream_lock_timeout")]
    pub stream_lock_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            capture_path: default_capture_path(),
            stream_path: default_stream_path(),
            prompt_path: default_prompt_path(),
            framerate_hint: default_framerate_hint(),
            stream_lock_timeout_ms: default_stream_lock_timeout(),
        }
    }
}

/// Sensor device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Sensor module the board is wired for
    #[serde(default = "default_model")]
    pub model: String,

    /// JPEG quality used when converting non-JPEG frames (1-100)
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,

    /// Initial frame size
    #[serde(default = "default_frame_size")]
    pub frame_size: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            jpeg_quality: default_quality(),
            frame_size: default_frame_size(),
        }
    }
}

/// Roots for the two removable media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sd_root")]
    pub sd_root: String,

    #[serde(default = "default_mmc_root")]
    pub mmc_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sd_root: default_sd_root(),
            mmc_root: default_mmc_root(),
        }
    }
}

/// Snapshot export and settings persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Prefix of synthesized export filenames
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Key under which sensor settings are persisted
    #[serde(default = "default_settings_key")]
    pub settings_key: String,

    /// Settings store file
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            settings_key: default_settings_key(),
            settings_path: default_settings_path(),
        }
    }
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_capture_path() -> String {
    "/_capture".to_string()
}
fn default_stream_path() -> String {
    "/_stream".to_string()
}
fn default_prompt_path() -> String {
    "/_prompt".to_string()
}
fn default_framerate_hint() -> u32 {
    60
}
fn default_stream_lock_timeout() -> u64 {
    5000
}
fn default_model() -> String {
    "ai-thinker".to_string()
}
fn default_quality() -> u8 {
    80
}
fn default_frame_size() -> String {
    "svga".to_string()
}
fn default_sd_root() -> String {
    "./media/sd".to_string()
}
fn default_mmc_root() -> String {
    "./media/mmc".to_string()
}
fn default_prefix() -> String {
    "/webcam".to_string()
}
fn default_settings_key() -> String {
    "webcam".to_string()
}
fn default_settings_path() -> String {
    "./settings.toml".to_string()
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, path) in [
            ("capture_path", &self.server.capture_path),
            ("stream_path", &self.server.stream_path),
            ("prompt_path", &self.server.prompt_path),
        ] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-empty absolute path, got {:?}",
                    name, path
                )));
            }
        }

        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                self.camera.jpeg_quality
            )));
        }

        if self.server.framerate_hint == 0 {
            return Err(ConfigError::Invalid(
                "framerate_hint must be > 0".to_string(),
            ));
        }

        if self.server.stream_lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "stream_lock_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.export.prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "export prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.capture_path, "/_capture");
        assert_eq!(config.server.stream_path, "/_stream");
        assert_eq!(config.server.prompt_path, "/_prompt");
        assert_eq!(config.export.prefix, "/webcam");
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
[server]
port = 8080
stream_path = "/video"
framerate_hint = 30

[camera]
model = "esp-eye"
jpeg_quality = 90

[export]
prefix = "/front-door"
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.stream_path, "/video");
        assert_eq!(config.server.framerate_hint, 30);
        assert_eq!(config.camera.model, "esp-eye");
        assert_eq!(config.camera.jpeg_quality, 90);
        assert_eq!(config.export.prefix, "/front-door");
        // Untouched sections keep their defaults
        assert_eq!(config.server.capture_path, "/_capture");
        assert_eq!(config.storage.sd_root, "./media/sd");
    }

    #[test]
    fn test_invalid_quality() {
        let toml = r#"
[camera]
jpeg_quality = 101
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_invalid_endpoint_path() {
        let toml = r#"
[server]
capture_path = "capture"
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_zero_lock_timeout_rejected() {
        let toml = r#"
[server]
stream_lock_timeout_ms = 0
        "#;
        assert!(Config::from_str(toml).is_err());
    }
}
