//! Unified error type for fragment conversion and timeline maintenance.
//!
//! Fragment-local failures ([`Error::MalformedContainer`],
//! [`Error::MissingRequiredBox`]) abort a single conversion. The timeline
//! variants ([`Error::ClipConsistency`], [`Error::TimelineAnchorNotFound`])
//! are reported but never stop the caller; see [`Error::is_fatal`].

use std::fmt;

/// Unified error type covering all failure modes in mss-remux.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input bytes could not be decomposed into well-formed boxes.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// A box the conversion cannot proceed without is absent.
    #[error("Missing required box: {0}")]
    MissingRequiredBox(&'static str),

    /// Clip rebasing produced a negative duration for the last segment.
    #[error("Clip consistency error: residual duration {residual} for clip [{clip_begin}, {clip_end})")]
    ClipConsistency {
        /// The negative residual that was clamped to zero.
        residual: i64,
        /// Clip start, in timeline ticks.
        clip_begin: u64,
        /// Clip end, in timeline ticks.
        clip_end: u64,
    },

    /// No timeline segment starts at the fragment's decode time.
    #[error("Timeline anchor not found for decode time {decode_time}")]
    TimelineAnchorNotFound {
        /// The `tfdt` baseline that was searched for.
        decode_time: u64,
    },

    /// The computed availability window is empty.
    #[error("No segments available yet (delay {delay_secs:.3}s)")]
    SegmentsUnavailable {
        /// How far the window start lies past its end, in seconds.
        delay_secs: f64,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "representation").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Input data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether this error discards the fragment being processed.
    ///
    /// Clip, anchor and availability errors are diagnostics: the operation
    /// that raised them has already continued with a fallback.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ClipConsistency { .. }
                | Error::TimelineAnchorNotFound { .. }
                | Error::SegmentsUnavailable { .. }
        )
    }

    /// Convenience constructor for [`Error::MalformedContainer`].
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedContainer(msg.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
