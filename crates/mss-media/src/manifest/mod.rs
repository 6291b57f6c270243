//! Segment lists derived from manifest chunk descriptors.
//!
//! A Smooth Streaming manifest lists each stream's fragments as compressed
//! `<c t=".." d=".." r=".."/>` chunks. [`SegmentListBuilder`] unrolls them
//! into a flat [`Timeline`] and, for clips cut out of a longer stream,
//! rebases the result so that it starts at zero.

pub mod live;
pub mod template;

pub use live::{availability_start_time, time_shift_buffer_depth_secs};
pub use template::{keyframe_url, SegmentTemplate};

use mss_core::{Error, TICKS_PER_SECOND};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::timeline::{Segment, Timeline};

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// One chunk descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Chunk {
    /// Start time; absent means "follows the previous segment".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<u64>,
    /// Duration; absent means "until the next segment starts".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<u64>,
    /// Repeat count. Anything that is not a number reads as absent.
    #[serde(
        default,
        deserialize_with = "lenient_repeat",
        skip_serializing_if = "Option::is_none"
    )]
    pub r: Option<i64>,
}

impl Chunk {
    pub fn new(t: Option<u64>, d: u64, r: Option<i64>) -> Self {
        Self { t, d: Some(d), r }
    }

    /// Number of segments this chunk expands to (at least one).
    pub fn repeat_count(&self) -> u64 {
        match self.r {
            Some(r) if r > 0 => r as u64,
            _ => 1,
        }
    }
}

/// Accept integers, fractional numbers (rounded up, as a `< r` loop
/// would) and numeric strings; everything else becomes `None`.
fn lenient_repeat<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let number = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|n| n.is_finite()).map(|n| n.ceil() as i64))
}

/// Boundaries of a clip inside its source stream, in timeline ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipBounds {
    pub clip_begin: u64,
    pub clip_end: u64,
}

impl ClipBounds {
    pub fn new(clip_begin: u64, clip_end: u64) -> Self {
        Self {
            clip_begin,
            clip_end,
        }
    }

    /// A clip without an end (`clip_end <= clip_begin`) is left unrebased.
    pub fn is_unbounded(&self) -> bool {
        self.clip_end <= self.clip_begin
    }

    pub fn duration(&self) -> u64 {
        self.clip_end.saturating_sub(self.clip_begin)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Result of [`SegmentListBuilder::build`].
#[derive(Debug)]
pub struct SegmentList {
    pub timeline: Timeline,
    /// Non-fatal problems met while building ([`Error::ClipConsistency`]).
    pub warnings: Vec<Error>,
}

/// Expands chunk descriptors into a timeline.
#[derive(Debug, Clone, Copy)]
pub struct SegmentListBuilder {
    timescale: u64,
}

impl Default for SegmentListBuilder {
    fn default() -> Self {
        Self {
            timescale: TICKS_PER_SECOND,
        }
    }
}

/// Segment under construction; `d` may still be unknown.
struct Pending {
    t: u64,
    d: Option<u64>,
}

impl SegmentListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timescale of the produced timeline.
    pub fn timescale(mut self, timescale: u64) -> Self {
        self.timescale = timescale;
        self
    }

    /// Expand `chunks`, then rebase for `clip` when one is given.
    pub fn build(&self, chunks: &[Chunk], clip: Option<ClipBounds>) -> SegmentList {
        let mut pending: Vec<Pending> = Vec::new();

        for chunk in chunks {
            for repeat in 0..chunk.repeat_count() {
                let mut t = if repeat == 0 { chunk.t } else { None };
                if pending.is_empty() && t.is_none() {
                    t = Some(0);
                }

                if let Some(prev) = pending.last_mut() {
                    if prev.d.is_none() {
                        prev.d = t.map(|t| t.saturating_sub(prev.t));
                    }
                }
                let t = match (t, pending.last()) {
                    (Some(t), _) => t,
                    (None, Some(prev)) => prev.t.saturating_add(prev.d.unwrap_or(0)),
                    (None, None) => 0,
                };

                pending.push(Pending { t, d: chunk.d });
            }
        }

        let mut segments: Vec<Segment> = pending
            .into_iter()
            .map(|p| Segment::new(p.t, p.d.unwrap_or(0)))
            .collect();

        let mut warnings = Vec::new();
        if let Some(clip) = clip.filter(|c| !c.is_unbounded()) {
            rebase_for_clip(&mut segments, clip, &mut warnings);
        }

        debug!(
            chunks = chunks.len(),
            segments = segments.len(),
            "expanded segment list"
        );

        SegmentList {
            timeline: Timeline::from_segments(segments).with_timescale(self.timescale),
            warnings,
        }
    }
}

/// Shift the list so the clip starts at zero and its segments exactly fill
/// `clip.duration()`. Original start times are kept in `source_time`.
fn rebase_for_clip(segments: &mut [Segment], clip: ClipBounds, warnings: &mut Vec<Error>) {
    let count = segments.len();
    let mut total: u64 = 0;

    for (index, seg) in segments.iter_mut().enumerate() {
        seg.source_time = Some(seg.t);

        if index == 0 {
            let first = seg.end() as i64 - clip.clip_begin as i64;
            seg.d = clamp_residual(first, clip, warnings);
        }

        seg.t = total;

        if index == count - 1 {
            let residual = clip.duration() as i64 - total as i64;
            seg.d = clamp_residual(residual, clip, warnings);
        } else {
            total += seg.d;
        }
    }
}

fn clamp_residual(residual: i64, clip: ClipBounds, warnings: &mut Vec<Error>) -> u64 {
    if residual >= 0 {
        return residual as u64;
    }
    let err = Error::ClipConsistency {
        residual,
        clip_begin: clip.clip_begin,
        clip_end: clip.clip_end,
    };
    warn!("{err}");
    warnings.push(err);
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(list: &SegmentList) -> Vec<(u64, u64)> {
        list.timeline.iter().map(|s| (s.t, s.d)).collect()
    }

    #[test]
    fn repeat_expansion() {
        let chunks = [Chunk::new(Some(0), 1000, Some(3)), Chunk::new(None, 500, None)];
        let list = SegmentListBuilder::new().build(&chunks, None);
        assert_eq!(
            spans(&list),
            vec![(0, 1000), (1000, 1000), (2000, 1000), (3000, 500)]
        );
        assert!(list.warnings.is_empty());
    }

    #[test]
    fn first_segment_without_time_starts_at_zero() {
        let list = SegmentListBuilder::new().build(&[Chunk::new(None, 20, Some(2))], None);
        assert_eq!(spans(&list), vec![(0, 20), (20, 20)]);
    }

    #[test]
    fn explicit_time_opens_a_gap() {
        let chunks = [Chunk::new(Some(0), 100, None), Chunk::new(Some(150), 100, None)];
        let list = SegmentListBuilder::new().build(&chunks, None);
        assert_eq!(spans(&list), vec![(0, 100), (150, 100)]);
        assert!(list.timeline.is_well_formed());
    }

    #[test]
    fn missing_duration_is_back_filled() {
        let chunks = [
            Chunk {
                t: Some(0),
                d: None,
                r: None,
            },
            Chunk::new(Some(400), 100, None),
        ];
        let list = SegmentListBuilder::new().build(&chunks, None);
        assert_eq!(spans(&list), vec![(0, 400), (400, 100)]);
    }

    #[test]
    fn non_positive_repeat_yields_one_segment() {
        let chunks = [Chunk::new(Some(0), 10, Some(0)), Chunk::new(None, 10, Some(-3))];
        let list = SegmentListBuilder::new().build(&chunks, None);
        assert_eq!(spans(&list), vec![(0, 10), (10, 10)]);
    }

    #[test]
    fn clip_rebasing() {
        let chunks = [Chunk::new(Some(500), 1000, None), Chunk::new(Some(1500), 1000, None)];
        let list = SegmentListBuilder::new().build(&chunks, Some(ClipBounds::new(500, 2500)));
        assert_eq!(spans(&list), vec![(0, 1000), (1000, 1000)]);
        assert_eq!(list.timeline.get(1).unwrap().request_time(), 1500);
        assert!(list.warnings.is_empty());
    }

    #[test]
    fn clip_starting_mid_segment_shortens_first() {
        let chunks = [Chunk::new(Some(0), 1000, Some(3))];
        let list = SegmentListBuilder::new().build(&chunks, Some(ClipBounds::new(400, 2800)));
        // First: 0 + 1000 - 400 = 600; last fills 2400 - (600 + 1000).
        assert_eq!(spans(&list), vec![(0, 600), (600, 1000), (1600, 800)]);
        assert_eq!(list.timeline.total_duration(), 2400);
    }

    #[test]
    fn clip_too_short_reports_consistency_error() {
        let chunks = [Chunk::new(Some(0), 1000, Some(3))];
        let list = SegmentListBuilder::new().build(&chunks, Some(ClipBounds::new(0, 1500)));
        assert_eq!(list.timeline.last().unwrap().d, 0);
        assert_eq!(list.warnings.len(), 1);
        assert!(matches!(
            list.warnings[0],
            Error::ClipConsistency { residual: -500, .. }
        ));
    }

    #[test]
    fn unbounded_clip_is_not_rebased() {
        let chunks = [Chunk::new(Some(500), 1000, None)];
        let list = SegmentListBuilder::new().build(&chunks, Some(ClipBounds::new(500, 500)));
        assert_eq!(spans(&list), vec![(500, 1000)]);
        assert!(list.timeline.get(0).unwrap().source_time.is_none());
    }

    #[test]
    fn chunk_repeat_parsing_is_lenient() {
        let chunks: Vec<Chunk> = serde_json::from_str(
            r#"[{"t":0,"d":10,"r":2},{"d":10,"r":"abc"},{"d":10,"r":"2"},{"d":10,"r":1.5},{"d":10,"r":null}]"#,
        )
        .unwrap();
        let counts: Vec<_> = chunks.iter().map(Chunk::repeat_count).collect();
        assert_eq!(counts, vec![2, 1, 2, 2, 1]);
    }
}
