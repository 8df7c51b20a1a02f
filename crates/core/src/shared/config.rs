use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    APP_DIR_NAME, DEFAULT_CONFIDENCE, DEFAULT_MAX_DURATION_SECONDS, DEFAULT_PROCESSING_DELAY_MS,
    DEFAULT_RECORDER_FLUSH_TIMEOUT_MS, DEFAULT_RECORDER_MIME_TYPES, DEFAULT_SAMPLING_INTERVAL_MS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Camera/microphone constraints sent with the permission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_mode: FacingMode,
    pub audio: bool,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            facing_mode: FacingMode::User,
            audio: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub max_duration_seconds: u32,
    pub sampling_interval_ms: u64,
    pub processing_delay_ms: u64,
    pub recorder_flush_timeout_ms: u64,
    pub recorder_mime_types: Vec<String>,
    pub confidence: f64,
    pub video_constraints: VideoConstraints,
    /// Highlight detected faces in the overlay.
    pub highlight_face: bool,
    /// Draw landmark points in the overlay.
    pub draw_landmarks: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: DEFAULT_MAX_DURATION_SECONDS,
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            processing_delay_ms: DEFAULT_PROCESSING_DELAY_MS,
            recorder_flush_timeout_ms: DEFAULT_RECORDER_FLUSH_TIMEOUT_MS,
            recorder_mime_types: DEFAULT_RECORDER_MIME_TYPES
                .iter()
                .map(|m| m.to_string())
                .collect(),
            confidence: DEFAULT_CONFIDENCE,
            video_constraints: VideoConstraints::default(),
            highlight_face: true,
            draw_landmarks: true,
        }
    }
}

impl VerificationConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("settings.json"))
    }

    /// Loads user settings, falling back to defaults when the file is
    /// missing, unreadable, or invalid.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                log::warn!("Ignoring settings: {e}");
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(json) = serde_json::to_string_pretty(self) {
                let _ = fs::write(path, json);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_duration_seconds == 0 {
            return Err(ConfigError::Invalid(
                "max_duration_seconds must be at least 1".into(),
            ));
        }
        if self.sampling_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sampling_interval_ms must be at least 1".into(),
            ));
        }
        if self.recorder_mime_types.is_empty() {
            return Err(ConfigError::Invalid(
                "recorder_mime_types must list at least one encoding".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::Invalid(format!(
                "confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        Ok(())
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn recorder_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.recorder_flush_timeout_ms)
    }
}
