//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON. Every section
//! defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::media::TICKS_PER_SECOND;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub live: LiveConfig,
    pub transcode: TranscodeConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load configuration strictly: a missing or invalid file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.live.dvr_window_secs.is_finite() || self.live.dvr_window_secs < 0.0 {
            warnings.push(format!(
                "live.dvr_window_secs {} is not a non-negative number; DVR trimming is disabled",
                self.live.dvr_window_secs
            ));
        }

        if self.transcode.timescale == 0 {
            warnings.push("transcode.timescale is 0; decode times will all be zero".into());
        }

        if self.transcode.timescale as u64 > TICKS_PER_SECOND {
            warnings.push(format!(
                "transcode.timescale {} is finer than the manifest clock ({TICKS_PER_SECOND})",
                self.transcode.timescale
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// What to do when a live availability window comes out inverted
/// (its end lies before its start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvertedRangePolicy {
    /// Report `SegmentsUnavailable` and let the caller wait.
    #[default]
    Reject,
    /// Treat the window as open-ended: the end becomes unbounded.
    UnboundedEnd,
}

/// Live presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// DVR window length in seconds; `0` disables head trimming.
    pub dvr_window_secs: f64,
    pub inverted_range_policy: InvertedRangePolicy,
}

impl LiveConfig {
    /// The DVR window to hand to the synchronizer, or `0.0` when invalid.
    pub fn effective_dvr_window(&self) -> f64 {
        if self.dvr_window_secs.is_finite() && self.dvr_window_secs > 0.0 {
            self.dvr_window_secs
        } else {
            0.0
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            dvr_window_secs: 0.0,
            inverted_range_policy: InvertedRangePolicy::default(),
        }
    }
}

/// Fragment conversion defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Duplicate single-sample fragments to fill their nominal duration.
    pub trick_mode: bool,
    /// Media timescale assumed when a request does not carry one.
    #[serde(default = "default_timescale")]
    pub timescale: u32,
}

fn default_timescale() -> u32 {
    TICKS_PER_SECOND as u32
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            trick_mode: false,
            timescale: default_timescale(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.live.dvr_window_secs, 0.0);
        assert_eq!(cfg.live.inverted_range_policy, InvertedRangePolicy::Reject);
        assert!(!cfg.transcode.trick_mode);
        assert_eq!(cfg.transcode.timescale, 10_000_000);
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn negative_dvr_window_warns() {
        let mut cfg = Config::default();
        cfg.live.dvr_window_secs = -5.0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("dvr_window_secs")));
        assert_eq!(cfg.live.effective_dvr_window(), 0.0);
    }

    #[test]
    fn zero_timescale_warns() {
        let mut cfg = Config::default();
        cfg.transcode.timescale = 0;
        assert!(cfg.validate().iter().any(|w| w.contains("timescale")));
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"live": {"dvr_window_secs": 30, "inverted_range_policy": "unbounded_end"}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.live.dvr_window_secs, 30.0);
        assert_eq!(cfg.live.inverted_range_policy, InvertedRangePolicy::UnboundedEnd);
        assert_eq!(cfg.live.effective_dvr_window(), 30.0);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.transcode.timescale, 10_000_000);
    }

    #[test]
    fn parse_invalid_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None);
        assert_eq!(cfg.live.dvr_window_secs, 0.0);
    }

    #[test]
    fn load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(Some(&dir.path().join("absent.json")));
        assert!(!cfg.transcode.trick_mode);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"transcode": {{"trick_mode": true}}}}"#).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert!(cfg.transcode.trick_mode);
        assert_eq!(cfg.transcode.timescale, 10_000_000);
    }
}
