//! Media-domain enums and the Smooth Streaming clock.
//!
//! Manifest times, fragment hints and timeline segments all count in
//! 100-nanosecond ticks; [`TICKS_PER_SECOND`] converts them to seconds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ticks per second of the manifest / live-hint clock (100 ns units).
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Convert a tick count in `timescale` units to seconds.
pub fn ticks_to_secs(ticks: u64, timescale: u64) -> f64 {
    if timescale == 0 {
        0.0
    } else {
        ticks as f64 / timescale as f64
    }
}

/// Convert seconds to whole ticks of `timescale`, rounding down.
pub fn secs_to_ticks(secs: f64, timescale: u64) -> u64 {
    if secs <= 0.0 {
        0
    } else {
        (secs * timescale as f64).floor() as u64
    }
}

// ---------------------------------------------------------------------------
// MediaType
// ---------------------------------------------------------------------------

/// Stream type, as named by the manifest's `StreamIndex@Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Text,
}

impl MediaType {
    /// Whether fragments of this type carry decodable samples worth
    /// duplicating or requesting as keyframes.
    pub fn is_av(&self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Text => write!(f, "text"),
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// PresentationKind
// ---------------------------------------------------------------------------

/// Whether a presentation is a growing live window or a fixed asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationKind {
    #[default]
    Static,
    Dynamic,
}

impl fmt::Display for PresentationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}
