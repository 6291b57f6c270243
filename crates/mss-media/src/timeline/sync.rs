//! Reconcile a live timeline with the hints carried inside fragments.
//!
//! Live fragments announce the fragments that follow them (`tfrf`). Those
//! announcements extend the timeline past what the manifest listed, and
//! they also correct segments whose boundaries drifted. Once the timeline
//! changed, segments older than the DVR window are dropped from its head.
//!
//! Work is split in two: [`LiveTimelineSynchronizer::plan`] reads the
//! timeline and describes the edit, [`SyncPlan::commit`] applies it. A
//! caller that may still fail after planning (a fragment conversion, say)
//! commits only once it knows it will succeed.

use mss_core::events::{DvrRange, DvrReporter};
use mss_core::{ticks_to_secs, Error, RepresentationId, Result};
use tracing::{debug, info, warn};

use super::{Segment, Timeline};
use crate::boxes::TfrfEntry;

/// Applies live hints to a timeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveTimelineSynchronizer {
    dvr_window_secs: f64,
}

impl LiveTimelineSynchronizer {
    /// `dvr_window_secs <= 0` disables head trimming.
    pub fn new(dvr_window_secs: f64) -> Self {
        Self { dvr_window_secs }
    }

    pub fn dvr_window_secs(&self) -> f64 {
        self.dvr_window_secs
    }

    /// Describe the edits `entries` imply for `timeline`.
    ///
    /// `decode_time` is the fragment's `tfdt` baseline; the segment starting
    /// there anchors the corrections.
    pub fn plan(&self, entries: &[TfrfEntry], decode_time: u64, timeline: &Timeline) -> SyncPlan {
        // Appends: each entry is compared with the newest segment so far.
        let mut appended = Vec::new();
        let mut last_t = timeline.last().map(|s| s.t);
        for entry in entries {
            if last_t.map_or(true, |t| entry.absolute_time > t) {
                debug!(t = entry.absolute_time, d = entry.duration, "appending segment from live hint");
                appended.push(Segment::new(entry.absolute_time, entry.duration));
                last_t = Some(entry.absolute_time);
            }
        }

        let mut view = PlannedView {
            base: timeline,
            appended: &appended,
            corrections: Vec::new(),
        };

        // Corrections, relative to the anchor found from the tail.
        let anchor = (0..view.len()).rev().find(|&i| view.get(i).t == decode_time);
        match anchor {
            Some(anchor) => {
                for (i, entry) in entries.iter().enumerate() {
                    let index = anchor + i;
                    if index >= view.len() {
                        break;
                    }
                    let current = view.get(index);
                    if current.end() != entry.absolute_time {
                        debug!(
                            index,
                            t = entry.absolute_time,
                            d = entry.duration,
                            "correcting segment from live hint"
                        );
                        let mut corrected = current;
                        corrected.t = entry.absolute_time;
                        corrected.d = entry.duration;
                        view.corrections.push((index, corrected));
                    }
                }
            }
            None => {
                warn!(decode_time, "{}", Error::TimelineAnchorNotFound { decode_time });
            }
        }

        let changed = !appended.is_empty() || !view.corrections.is_empty();

        // DVR trim: drop head segments older than the window.
        let mut trimmed = 0;
        let mut dvr_range = None;
        if changed && self.dvr_window_secs > 0.0 && view.len() > 0 {
            let last = view.get(view.len() - 1);
            let window_ticks = self.dvr_window_secs * timeline.timescale() as f64;
            let availability_start = last.t as f64 - window_ticks;
            while trimmed < view.len() - 1 && (view.get(trimmed).t as f64) < availability_start {
                trimmed += 1;
            }

            let first = view.get(trimmed);
            dvr_range = Some(DvrRange {
                start_secs: ticks_to_secs(first.t, timeline.timescale()),
                end_secs: ticks_to_secs(last.end(), timeline.timescale()),
            });
        }

        let corrections = view.corrections;
        SyncPlan {
            base_len: timeline.len(),
            base_last: timeline.last().copied(),
            appended,
            anchor,
            corrections,
            trimmed,
            dvr_range,
        }
    }

    /// Plan and commit in one step, then notify `reporter`.
    pub fn apply(
        &self,
        entries: &[TfrfEntry],
        decode_time: u64,
        timeline: &mut Timeline,
        reporter: Option<(&RepresentationId, &dyn DvrReporter)>,
    ) -> Result<SyncOutcome> {
        let outcome = self.plan(entries, decode_time, timeline).commit(timeline)?;
        if let Some((id, reporter)) = reporter {
            outcome.report(id, timeline, reporter);
        }
        Ok(outcome)
    }
}

/// Read-only view of the timeline as it will look once a plan commits.
struct PlannedView<'a> {
    base: &'a Timeline,
    appended: &'a [Segment],
    corrections: Vec<(usize, Segment)>,
}

impl PlannedView<'_> {
    fn len(&self) -> usize {
        self.base.len() + self.appended.len()
    }

    fn get(&self, index: usize) -> Segment {
        if let Some((_, seg)) = self.corrections.iter().rev().find(|(i, _)| *i == index) {
            return *seg;
        }
        match self.base.get(index) {
            Some(seg) => *seg,
            None => self.appended[index - self.base.len()],
        }
    }
}

/// Edits computed by [`LiveTimelineSynchronizer::plan`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    base_len: usize,
    base_last: Option<Segment>,
    appended: Vec<Segment>,
    anchor: Option<usize>,
    /// `(index after appends, replacement)`.
    corrections: Vec<(usize, Segment)>,
    trimmed: usize,
    dvr_range: Option<DvrRange>,
}

impl SyncPlan {
    /// Whether committing would change the timeline.
    pub fn is_noop(&self) -> bool {
        self.appended.is_empty() && self.corrections.is_empty() && self.trimmed == 0
    }

    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    /// Apply the plan to the timeline it was computed from.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if `timeline` changed since planning.
    pub fn commit(self, timeline: &mut Timeline) -> Result<SyncOutcome> {
        if timeline.len() != self.base_len || timeline.last().copied() != self.base_last {
            return Err(Error::Validation(
                "timeline changed between planning and commit".into(),
            ));
        }

        let appended = self.appended.len();
        for seg in self.appended {
            timeline.push(seg);
        }
        for (index, seg) in &self.corrections {
            if let Some(slot) = timeline.get_mut(*index) {
                *slot = *seg;
            }
        }
        for _ in 0..self.trimmed {
            if let Some(seg) = timeline.pop_front() {
                debug!(t = seg.t, "trimming segment outside DVR window");
            }
        }

        if appended > 0 || self.trimmed > 0 {
            info!(
                appended,
                corrected = self.corrections.len(),
                trimmed = self.trimmed,
                segments = timeline.len(),
                "live timeline updated"
            );
        }

        Ok(SyncOutcome {
            appended,
            corrected: self.corrections.len(),
            trimmed: self.trimmed,
            anchor: self.anchor,
            dvr_range: self.dvr_range,
        })
    }
}

/// What a committed plan did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncOutcome {
    pub appended: usize,
    pub corrected: usize,
    pub trimmed: usize,
    /// Index of the anchor segment before trimming, if one was found.
    pub anchor: Option<usize>,
    /// Retained range to report, when the window was re-evaluated.
    pub dvr_range: Option<DvrRange>,
}

impl SyncOutcome {
    /// Whether the timeline changed.
    pub fn changed(&self) -> bool {
        self.appended + self.corrected + self.trimmed > 0
    }

    /// Forward what changed to `reporter`. `timeline` is the committed
    /// timeline the outcome belongs to.
    pub fn report(&self, id: &RepresentationId, timeline: &Timeline, reporter: &dyn DvrReporter) {
        if self.appended > 0 {
            let live_edge = timeline.live_edge_secs().unwrap_or_default();
            reporter.segments_appended(id, self.appended, live_edge);
        }
        if self.trimmed > 0 {
            reporter.segments_trimmed(id, self.trimmed);
        }
        if let Some(range) = self.dvr_range {
            reporter.report_dvr_range(id, range);
        }
    }

    /// Fold another outcome into this one (several hint boxes in one
    /// fragment). The latest range wins.
    pub fn merge(&mut self, other: SyncOutcome) {
        self.appended += other.appended;
        self.corrected += other.corrected;
        self.trimmed += other.trimmed;
        self.anchor = other.anchor.or(self.anchor);
        if other.dvr_range.is_some() {
            self.dvr_range = other.dvr_range;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mss_core::events::EventBus;
    use mss_core::TICKS_PER_SECOND;

    const S: u64 = TICKS_PER_SECOND;

    fn entry(t: u64, d: u64) -> TfrfEntry {
        TfrfEntry {
            absolute_time: t,
            duration: d,
        }
    }

    fn contiguous(count: u64, d: u64) -> Timeline {
        Timeline::from_segments((0..count).map(|i| Segment::new(i * d, d)))
    }

    #[test]
    fn appends_newer_entries() {
        let mut tl = contiguous(3, 2 * S);
        let sync = LiveTimelineSynchronizer::new(0.0);
        let outcome = sync
            .apply(&[entry(6 * S, 2 * S), entry(8 * S, 2 * S)], 4 * S, &mut tl, None)
            .unwrap();

        assert_eq!(outcome.appended, 2);
        assert_eq!(outcome.corrected, 0);
        assert_eq!(outcome.anchor, Some(2));
        assert_eq!(tl.len(), 5);
        assert_eq!(tl.last().unwrap().t, 8 * S);
        assert!(tl.is_well_formed());
    }

    #[test]
    fn ignores_entries_already_known() {
        let mut tl = contiguous(3, 2 * S);
        let sync = LiveTimelineSynchronizer::new(0.0);
        let outcome = sync
            .apply(&[entry(2 * S, 2 * S)], 0, &mut tl, None)
            .unwrap();
        assert!(!outcome.changed());
        assert_eq!(tl, contiguous(3, 2 * S));
    }

    #[test]
    fn corrects_drifted_segment_after_anchor() {
        // Segment 1 claims to end at 4s but the hint says the next fragment
        // starts at 4.5s.
        let mut tl = contiguous(3, 2 * S);
        let sync = LiveTimelineSynchronizer::new(0.0);
        let outcome = sync
            .apply(&[entry(4 * S + S / 2, 2 * S)], 2 * S, &mut tl, None)
            .unwrap();

        assert_eq!(outcome.anchor, Some(1));
        // The entry is newer than the last segment (4s) so it is appended,
        // then the anchor segment is rewritten with the entry.
        assert_eq!(outcome.appended, 1);
        assert_eq!(outcome.corrected, 1);
        assert_eq!(tl.get(1).unwrap().t, 4 * S + S / 2);
    }

    #[test]
    fn missing_anchor_keeps_appends() {
        let mut tl = contiguous(2, 2 * S);
        let sync = LiveTimelineSynchronizer::new(0.0);
        let outcome = sync
            .apply(&[entry(4 * S, 2 * S)], 123, &mut tl, None)
            .unwrap();
        assert_eq!(outcome.anchor, None);
        assert_eq!(outcome.appended, 1);
        assert_eq!(outcome.corrected, 0);
        assert_eq!(tl.len(), 3);
    }

    #[test]
    fn empty_timeline_accepts_all_entries() {
        let mut tl = Timeline::default();
        let sync = LiveTimelineSynchronizer::new(0.0);
        let outcome = sync
            .apply(&[entry(10, 5), entry(15, 5)], 10, &mut tl, None)
            .unwrap();
        assert_eq!(outcome.appended, 2);
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn dvr_window_trims_head_and_reports() {
        let mut tl = contiguous(10, 2 * S);
        let bus = EventBus::default();
        let id = RepresentationId::new("video_0");
        let reporter: &dyn DvrReporter = &bus;
        let sync = LiveTimelineSynchronizer::new(6.0);

        let outcome = sync
            .apply(&[entry(20 * S, 2 * S)], 18 * S, &mut tl, Some((&id, reporter)))
            .unwrap();

        // Last t = 20s, availability start = 14s: segments 0..14s go.
        assert_eq!(outcome.trimmed, 7);
        assert_eq!(tl.first().unwrap().t, 14 * S);
        assert!(tl.iter().all(|s| s.t >= 14 * S));
        let range = bus.last_dvr_range(&id).unwrap();
        assert_eq!(range.start_secs, 14.0);
        assert_eq!(range.end_secs, 22.0);
        // appended, trimmed, range
        assert_eq!(bus.recent_events(10).len(), 3);
    }

    #[test]
    fn unchanged_timeline_is_not_trimmed() {
        let mut tl = contiguous(10, 2 * S);
        let sync = LiveTimelineSynchronizer::new(6.0);
        let outcome = sync
            .apply(&[entry(2 * S, 2 * S)], 0, &mut tl, None)
            .unwrap();
        assert_eq!(outcome.trimmed, 0);
        assert!(outcome.dvr_range.is_none());
        assert_eq!(tl.len(), 10);
    }

    #[test]
    fn plan_does_not_mutate_and_stale_commit_fails() {
        let mut tl = contiguous(3, 2 * S);
        let sync = LiveTimelineSynchronizer::new(0.0);
        let plan = sync.plan(&[entry(6 * S, 2 * S)], 4 * S, &tl);
        assert!(!plan.is_noop());
        assert_eq!(tl.len(), 3);

        tl.push(Segment::new(6 * S, 2 * S));
        let err = plan.commit(&mut tl).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn outcomes_merge() {
        let mut a = SyncOutcome {
            appended: 1,
            ..Default::default()
        };
        a.merge(SyncOutcome {
            trimmed: 2,
            anchor: Some(4),
            dvr_range: Some(DvrRange {
                start_secs: 1.0,
                end_secs: 2.0,
            }),
            ..Default::default()
        });
        assert_eq!(a.appended, 1);
        assert_eq!(a.trimmed, 2);
        assert_eq!(a.anchor, Some(4));
        assert!(a.dvr_range.is_some());
    }
}
