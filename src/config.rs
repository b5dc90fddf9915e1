//! Session configuration
//!
//! Typed replacement for the attribute key/value store. A `SessionConfig` is
//! captured per session at `create()`; the mode is snapshotted at Realize and
//! the recording limits at Record.

use crate::error::{CamError, CamResult};
use crate::state_machine::Mode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Limits applied to one recording attempt. Zero disables a size or time limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingLimits {
    pub max_size_bytes: u64,
    pub max_time_ms: u64,
    pub minimum_free_bytes: u64,
}

impl Default for RecordingLimits {
    fn default() -> Self {
        Self {
            max_size_bytes: 0,
            max_time_ms: 0,
            minimum_free_bytes: 1024 * 1024,
        }
    }
}

impl RecordingLimits {
    pub fn has_size_limit(&self) -> bool {
        self.max_size_bytes > 0
    }

    pub fn has_time_limit(&self) -> bool {
        self.max_time_ms > 0
    }
}

/// Recording output and monitoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    pub limits: RecordingLimits,
    /// Output file; its parent volume is checked for free space
    pub target_path: PathBuf,
    /// Space kept free for the system on the target volume
    pub reserved_quota_bytes: u64,
    /// Minimum running-time distance between two RecordingStatus messages
    pub status_interval_ms: u64,
    /// Consecutive I/O errors tolerated before the recording is failed
    pub io_error_threshold: u32,
    /// Buffers between two runtime free-space checks
    pub storage_check_interval: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            limits: RecordingLimits::default(),
            target_path: std::env::temp_dir().join("camctl_recording.mp4"),
            reserved_quota_bytes: 0,
            status_interval_ms: 1000,
            io_error_threshold: 3,
            storage_check_interval: 30,
        }
    }
}

/// Wait for a minimum number of buffers before Pause/Commit.
///
/// The thresholds are tunable; they paper over buffer-delivery latency on some
/// encoders rather than reflecting a hardware constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressGate {
    pub min_frames: u64,
    pub max_polls: u32,
    pub poll_interval_ms: u64,
}

impl Default for ProgressGate {
    fn default() -> Self {
        Self {
            min_frames: 3,
            max_polls: 10,
            poll_interval_ms: 200,
        }
    }
}

impl ProgressGate {
    pub fn disabled() -> Self {
        Self {
            min_frames: 0,
            max_polls: 1,
            poll_interval_ms: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bounded retry for forced shutdown and resume walks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval_ms: 50,
        }
    }
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Complete per-session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub mode: Mode,
    /// Request the display overlay together with the camera
    pub display_overlay: bool,
    /// Upper bound for one pipeline state change
    pub transition_timeout_ms: u64,
    pub recording: RecordingConfig,
    pub progress_gate: ProgressGate,
    pub force_retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Video,
            display_overlay: true,
            transition_timeout_ms: 5000,
            recording: RecordingConfig::default(),
            progress_gate: ProgressGate::default(),
            force_retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn validate(&self) -> CamResult<()> {
        if self.transition_timeout_ms == 0 {
            return Err(CamError::Config(
                "transitionTimeoutMs must be greater than zero".to_string(),
            ));
        }
        if self.force_retry.max_attempts == 0 {
            return Err(CamError::Config(
                "forceRetry.maxAttempts must be at least 1".to_string(),
            ));
        }
        if self.progress_gate.max_polls == 0 {
            return Err(CamError::Config(
                "progressGate.maxPolls must be at least 1".to_string(),
            ));
        }
        if self.recording.io_error_threshold == 0 {
            return Err(CamError::Config(
                "recording.ioErrorThreshold must be at least 1".to_string(),
            ));
        }
        if self.recording.storage_check_interval == 0 {
            return Err(CamError::Config(
                "recording.storageCheckInterval must be at least 1".to_string(),
            ));
        }
        if self.recording.target_path.as_os_str().is_empty() {
            return Err(CamError::Config(
                "recording.targetPath must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> CamResult<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> CamResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_file(&self, path: &Path) -> CamResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.mode, Mode::Video);
        assert_eq!(config.transition_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{
                "mode": "image",
                "recording": { "limits": { "maxSizeBytes": 512000, "maxTimeMs": 0, "minimumFreeBytes": 0 } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.mode, Mode::Image);
        assert_eq!(config.recording.limits.max_size_bytes, 512000);
        assert!(config.recording.limits.has_size_limit());
        assert!(!config.recording.limits.has_time_limit());
        assert_eq!(config.recording.io_error_threshold, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = SessionConfig::from_json_str(r#"{ "transitionTimeoutMs": 0 }"#).unwrap_err();
        assert!(matches!(err, CamError::Config(_)));

        let err =
            SessionConfig::from_json_str(r#"{ "forceRetry": { "maxAttempts": 0 } }"#).unwrap_err();
        assert!(matches!(err, CamError::Config(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");

        let mut config = SessionConfig::default();
        config.mode = Mode::Audio;
        config.recording.limits.max_time_ms = 60_000;
        config.to_json_file(&path).unwrap();

        let loaded = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
