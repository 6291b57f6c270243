//! Which part of a timeline a player may request right now.

use mss_core::config::InvertedRangePolicy;
use mss_core::{Error, PresentationKind, Result};
use serde::Serialize;

use super::Timeline;

/// Requestable presentation interval, in seconds. `end_secs` is infinite
/// when the window was opened up by [`InvertedRangePolicy::UnboundedEnd`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AvailabilityRange {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl AvailabilityRange {
    pub fn contains(&self, secs: f64) -> bool {
        secs >= self.start_secs && secs <= self.end_secs
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_secs.is_infinite()
    }
}

/// Availability window of `timeline` at presentation time `now_secs`.
///
/// Static presentations expose the whole timeline. Live presentations
/// expose `[max(first, now - dvr), min(now, live edge)]`; a non-positive
/// `dvr_window_secs` leaves the start at the first segment.
///
/// # Errors
///
/// [`Error::SegmentsUnavailable`] when a live window is empty and the policy
/// is [`InvertedRangePolicy::Reject`], or when the timeline has no segments.
pub fn availability_range(
    timeline: &Timeline,
    kind: PresentationKind,
    now_secs: f64,
    dvr_window_secs: f64,
    policy: InvertedRangePolicy,
) -> Result<AvailabilityRange> {
    let (Some(first), Some(edge)) = (timeline.start_secs(), timeline.live_edge_secs()) else {
        return Err(Error::SegmentsUnavailable { delay_secs: 0.0 });
    };

    if kind == PresentationKind::Static {
        return Ok(AvailabilityRange {
            start_secs: first,
            end_secs: edge,
        });
    }

    let start = if dvr_window_secs > 0.0 {
        first.max(now_secs - dvr_window_secs)
    } else {
        first
    };
    let end = now_secs.min(edge);

    if end >= start {
        return Ok(AvailabilityRange {
            start_secs: start,
            end_secs: end,
        });
    }

    match policy {
        InvertedRangePolicy::Reject => {
            let delay_secs = start - end;
            tracing::warn!(delay_secs, "no segments available yet");
            Err(Error::SegmentsUnavailable { delay_secs })
        }
        InvertedRangePolicy::UnboundedEnd => Ok(AvailabilityRange {
            start_secs: start,
            end_secs: f64::INFINITY,
        }),
    }
}
