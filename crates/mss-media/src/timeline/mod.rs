//! Per-representation segment timeline.
//!
//! A [`Timeline`] is the ordered list of segments a player may request for
//! one representation. It is created by the manifest builder and then kept
//! in step with the live edge by the [`sync`] module.

pub mod availability;
pub mod registry;
pub mod sync;

pub use availability::{availability_range, AvailabilityRange};
pub use registry::TimelineRegistry;
pub use sync::{LiveTimelineSynchronizer, SyncOutcome, SyncPlan};

use mss_core::{ticks_to_secs, TICKS_PER_SECOND};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One addressable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in timeline ticks.
    pub t: u64,
    /// Duration in timeline ticks.
    pub d: u64,
    /// Start time as published by the server, when `t` was rebased for a
    /// clip. Fragment URLs are built from this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_time: Option<u64>,
}

impl Segment {
    pub fn new(t: u64, d: u64) -> Self {
        Self {
            t,
            d,
            source_time: None,
        }
    }

    /// End of the segment (`t + d`).
    pub fn end(&self) -> u64 {
        self.t.saturating_add(self.d)
    }

    /// Time to put in the fragment URL.
    pub fn request_time(&self) -> u64 {
        self.source_time.unwrap_or(self.t)
    }
}

fn default_timescale() -> u64 {
    TICKS_PER_SECOND
}

/// Ordered segment list of one representation.
///
/// Segments are sorted by `t` and never overlap. A segment's position in
/// the list is its availability index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default = "default_timescale")]
    timescale: u64,
    segments: VecDeque<Segment>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(TICKS_PER_SECOND)
    }
}

impl Timeline {
    /// An empty timeline counting in `timescale` ticks per second.
    pub fn new(timescale: u64) -> Self {
        Self {
            timescale,
            segments: VecDeque::new(),
        }
    }

    /// A timeline at the manifest clock holding `segments` as given.
    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            timescale: TICKS_PER_SECOND,
            segments: segments.into_iter().collect(),
        }
    }

    pub fn with_timescale(mut self, timescale: u64) -> Self {
        self.timescale = timescale;
        self
    }

    pub fn timescale(&self) -> u64 {
        self.timescale
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> Option<&Segment> {
        self.segments.front()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.back()
    }

    /// Segment at availability index `index`.
    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments.get_mut(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Segment> + ExactSizeIterator {
        self.segments.iter()
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push_back(segment);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Segment> {
        self.segments.pop_front()
    }

    /// Index of the last segment starting exactly at `t`, searching from
    /// the tail.
    pub fn rposition_of(&self, t: u64) -> Option<usize> {
        self.segments.iter().rposition(|s| s.t == t)
    }

    /// Index of the segment whose interval contains `t`.
    pub fn index_at(&self, t: u64) -> Option<usize> {
        self.segments.iter().position(|s| s.t <= t && t < s.end())
    }

    /// End of the last segment, in seconds.
    pub fn live_edge_secs(&self) -> Option<f64> {
        self.last().map(|s| ticks_to_secs(s.end(), self.timescale))
    }

    /// Start of the first segment, in seconds.
    pub fn start_secs(&self) -> Option<f64> {
        self.first().map(|s| ticks_to_secs(s.t, self.timescale))
    }

    /// Sum of all segment durations, in ticks.
    pub fn total_duration(&self) -> u64 {
        self.segments.iter().map(|s| s.d).sum()
    }

    /// Whether the list is sorted and free of overlaps.
    pub fn is_well_formed(&self) -> bool {
        self.segments
            .iter()
            .zip(self.segments.iter().skip(1))
            .all(|(a, b)| a.t <= b.t && a.end() <= b.t)
    }
}
