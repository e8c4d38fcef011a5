//! Session configuration.
//!
//! Every tunable the engine reads lives here and is handed to
//! [`crate::playback::Player::open`]; nothing is process-global.

use serde::{Deserialize, Serialize};

use crate::playback::sync::SyncSource;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// When late video frames may be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameDrop {
    /// Drop only when video is not the master clock.
    #[default]
    Auto,
    Always,
    Never,
}

/// Byte-based seeking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeekByBytes {
    /// Use byte seeks when the demuxer prefers them.
    #[default]
    Auto,
    On,
    Off,
}

/// Which timestamp a decoded picture is stamped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PtsReorder {
    /// Best-effort timestamp, then frame PTS, then packet DTS.
    #[default]
    Auto,
    /// Frame PTS as reported by the decoder.
    Decoder,
    /// DTS of the packet the frame came from.
    Packet,
}

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub sync: SyncSource,
    /// Start position in seconds.
    pub start_time: Option<f64>,
    /// Length of the play range in seconds.
    pub duration: Option<f64>,
    pub seek_by_bytes: SeekByBytes,
    /// Step for relative seeks, seconds.
    pub seek_interval: f64,
    /// 0 loops forever, 1 plays once.
    pub loop_count: u32,
    pub autoexit: bool,
    pub framedrop: FrameDrop,
    /// `None` enables infinite buffering only for realtime sources.
    pub infinite_buffer: Option<bool>,
    pub reorder_pts: PtsReorder,
    /// Startup volume percent, 0..=100.
    pub volume: u8,
    pub disable_video: bool,
    pub disable_audio: bool,
    pub disable_subtitles: bool,
    pub stream_video: Option<usize>,
    pub stream_audio: Option<usize>,
    pub stream_subtitle: Option<usize>,
    /// Combined packet queue ceiling in bytes.
    pub max_queue_bytes: usize,
    pub show_status: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sync: SyncSource::Audio,
            start_time: None,
            duration: None,
            seek_by_bytes: SeekByBytes::Auto,
            seek_interval: 10.0,
            loop_count: 1,
            autoexit: false,
            framedrop: FrameDrop::Auto,
            infinite_buffer: None,
            reorder_pts: PtsReorder::Auto,
            volume: 100,
            disable_video: false,
            disable_audio: false,
            disable_subtitles: false,
            stream_video: None,
            stream_audio: None,
            stream_subtitle: None,
            max_queue_bytes: 15 * 1024 * 1024,
            show_status: true,
        }
    }
}

impl PlayerConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PlayerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(start) = self.start_time {
            if !start.is_finite() {
                return Err(ConfigError::Invalid {
                    field: "start_time",
                    reason: format!("{start} is not finite"),
                });
            }
        }
        if let Some(duration) = self.duration {
            if !(duration.is_finite() && duration >= 0.0) {
                return Err(ConfigError::Invalid {
                    field: "duration",
                    reason: format!("{duration} must be a non-negative number of seconds"),
                });
            }
        }
        if !(self.seek_interval.is_finite() && self.seek_interval > 0.0) {
            return Err(ConfigError::Invalid {
                field: "seek_interval",
                reason: format!("{} must be positive", self.seek_interval),
            });
        }
        if self.volume > 100 {
            return Err(ConfigError::Invalid {
                field: "volume",
                reason: format!("{} exceeds 100", self.volume),
            });
        }
        Ok(())
    }

    /// Whether frame dropping applies given the resolved master clock.
    pub fn framedrop_active(&self, master: SyncSource) -> bool {
        match self.framedrop {
            FrameDrop::Always => true,
            FrameDrop::Never => false,
            FrameDrop::Auto => master != SyncSource::Video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.sync, SyncSource::Audio);
        assert_eq!(config.loop_count, 1);
        assert_eq!(config.max_queue_bytes, 15 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = PlayerConfig::from_toml_str(
            r#"
            sync = "external"
            loop_count = 0
            framedrop = "never"
            start_time = 12.5
            "#,
        )
        .unwrap();
        assert_eq!(config.sync, SyncSource::External);
        assert_eq!(config.loop_count, 0);
        assert_eq!(config.framedrop, FrameDrop::Never);
        assert_eq!(config.start_time, Some(12.5));
        assert_eq!(config.seek_interval, 10.0);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PlayerConfig::from_toml_str("volume = 101").is_err());
        assert!(PlayerConfig::from_toml_str("seek_interval = 0.0").is_err());
        assert!(PlayerConfig::from_toml_str("duration = -1.0").is_err());
        assert!(PlayerConfig::from_toml_str("sync = \"sideways\"").is_err());
    }

    #[test]
    fn test_framedrop_active() {
        let mut config = PlayerConfig::default();
        assert!(config.framedrop_active(SyncSource::Audio));
        assert!(!config.framedrop_active(SyncSource::Video));
        config.framedrop = FrameDrop::Always;
        assert!(config.framedrop_active(SyncSource::Video));
        config.framedrop = FrameDrop::Never;
        assert!(!config.framedrop_active(SyncSource::External));
    }
}
