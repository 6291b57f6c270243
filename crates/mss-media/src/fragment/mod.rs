//! PIFF to fMP4 fragment conversion.
//!
//! A Smooth Streaming fragment is a `moof` + `mdat` pair whose `traf` may
//! hold PIFF-specific boxes: `uuid` sample encryption, `tfxd` absolute
//! timestamps and `tfrf` look-ahead hints for live streams. The
//! [`FragmentTranscoder`] rewrites such a fragment into one standard fMP4
//! readers accept, and feeds the live hints into the representation's
//! [`Timeline`].
//!
//! Conversion is all-or-nothing: timeline edits are computed against a
//! working copy and only swapped in once the output has been serialized.

mod encryption;
mod trick;

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use mss_core::events::DvrReporter;
use mss_core::{secs_to_ticks, Error, RepresentationId, Result};
use tracing::{debug, debug_span};

use crate::boxes::{BoxBody, BoxKind, BoxTree, Mp4Box, Record, Tfdt, Tfhd, TfrfEntry, Trun};
use crate::timeline::{LiveTimelineSynchronizer, SyncOutcome, Timeline, TimelineRegistry};

/// Per-request parameters of one conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentContext {
    /// Track id to write into `tfhd` (1-based).
    pub track_id: u32,
    /// Presentation start of the fragment, in seconds.
    pub start_time: f64,
    /// Nominal duration of the fragment, in seconds.
    pub duration: f64,
    /// Media timescale of the track.
    pub timescale: u32,
    /// Fill the fragment with copies of its single sample.
    pub trick_mode: bool,
    /// Label used when reporting timeline changes; defaults to `track_<id>`.
    pub representation: Option<RepresentationId>,
}

impl FragmentContext {
    pub fn new(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            start_time: 0.0,
            duration: 0.0,
            timescale,
            trick_mode: false,
            representation: None,
        }
    }

    pub fn with_timing(mut self, start_time: f64, duration: f64) -> Self {
        self.start_time = start_time;
        self.duration = duration;
        self
    }

    pub fn with_trick_mode(mut self, trick_mode: bool) -> Self {
        self.trick_mode = trick_mode;
        self
    }

    pub fn with_representation(mut self, id: RepresentationId) -> Self {
        self.representation = Some(id);
        self
    }

    fn representation_id(&self) -> RepresentationId {
        self.representation
            .clone()
            .unwrap_or_else(|| RepresentationId::new(format!("track_{}", self.track_id)))
    }
}

/// Output of [`FragmentTranscoder::convert_detailed`].
#[derive(Debug, Clone)]
pub struct ConvertedFragment {
    pub data: Vec<u8>,
    /// Samples in the output `trun`.
    pub sample_count: usize,
    /// Timeline edits made from the fragment's live hints.
    pub sync: SyncOutcome,
}

/// Rewrites Smooth Streaming fragments into standard fMP4 fragments.
#[derive(Default)]
pub struct FragmentTranscoder {
    reporter: Option<Arc<dyn DvrReporter>>,
}

impl std::fmt::Debug for FragmentTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentTranscoder")
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl FragmentTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report DVR windows and segment changes to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn DvrReporter>) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }

    /// Convert one fragment, returning the rewritten bytes.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedContainer`] for undecodable input,
    /// [`Error::MissingRequiredBox`] when `moof`, `mdat`, `traf`, `trun` or
    /// `tfhd` is absent. On error `timeline` is untouched.
    pub fn convert(
        &self,
        data: &[u8],
        ctx: &FragmentContext,
        timeline: &mut Timeline,
        dvr_window_secs: f64,
    ) -> Result<Vec<u8>> {
        self.convert_detailed(data, ctx, timeline, dvr_window_secs)
            .map(|converted| converted.data)
    }

    /// [`convert`](Self::convert), also returning what changed.
    pub fn convert_detailed(
        &self,
        data: &[u8],
        ctx: &FragmentContext,
        timeline: &mut Timeline,
        dvr_window_secs: f64,
    ) -> Result<ConvertedFragment> {
        let span = debug_span!("convert_fragment", track_id = ctx.track_id, bytes_in = data.len());
        let _enter = span.enter();

        let mut tree = BoxTree::parse(data)?;
        check_required(&tree)?;

        let traf = traf_mut(&mut tree)?;
        let encrypted = encryption::normalize(traf);

        if let Some(tfhd) = traf.child_mut(BoxKind::Tfhd).and_then(Mp4Box::as_tfhd_mut) {
            tfhd.track_id = ctx.track_id;
        }

        let removed = traf.remove_children(BoxKind::Tfxd);
        if removed > 0 {
            debug!(removed, "dropped tfxd boxes");
        }

        let decode_time = ensure_tfdt(traf, ctx);

        // Live hints: plan against a working copy, commit after serialization.
        let hints: Vec<Vec<TfrfEntry>> = traf
            .children_of(BoxKind::Tfrf)
            .filter_map(Mp4Box::as_tfrf)
            .map(|tfrf| tfrf.entries.clone())
            .collect();
        traf.remove_children(BoxKind::Tfrf);

        let mut sync = SyncOutcome::default();
        let mut working = None;
        if !hints.is_empty() {
            let synchronizer = LiveTimelineSynchronizer::new(dvr_window_secs);
            let mut copy = timeline.clone();
            for entries in &hints {
                let plan = synchronizer.plan(entries, decode_time, &copy);
                sync.merge(plan.commit(&mut copy)?);
            }
            working = Some(copy);
        }

        normalize_flags(traf);

        let copies = if ctx.trick_mode {
            trick::replicate_single_sample(traf, ctx.duration, ctx.timescale)
        } else {
            None
        };
        let sample_count = traf
            .child(BoxKind::Trun)
            .and_then(Mp4Box::as_trun)
            .map_or(0, |trun| trun.samples.len());

        if let Some(copies) = copies {
            repeat_mdat(&mut tree, copies);
        }

        set_data_offset(&mut tree)?;

        if encrypted {
            let moof_offset = tree.byte_offset_of(BoxKind::Moof).unwrap_or(0);
            if let Some(offset) = tree.child(BoxKind::Moof).and_then(encryption::aux_info_offset) {
                encryption::set_aux_info_offset(traf_mut(&mut tree)?, moof_offset + offset);
            }
        }

        let out = tree.serialize();

        if let Some(copy) = working {
            *timeline = copy;
            if let Some(reporter) = &self.reporter {
                sync.report(&ctx.representation_id(), timeline, reporter.as_ref());
            }
        }

        debug!(
            samples = sample_count,
            bytes_out = out.len(),
            appended = sync.appended,
            corrected = sync.corrected,
            trimmed = sync.trimmed,
            "converted fragment"
        );

        Ok(ConvertedFragment {
            data: out,
            sample_count,
            sync,
        })
    }

    /// Convert a fragment of a registered representation, holding its
    /// timeline lock for the whole read-modify-write.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when `id` is not registered, otherwise as
    /// [`convert`](Self::convert).
    pub fn convert_registered(
        &self,
        registry: &TimelineRegistry,
        id: &RepresentationId,
        data: &[u8],
        ctx: &FragmentContext,
        dvr_window_secs: f64,
    ) -> Result<ConvertedFragment> {
        let ctx = match ctx.representation {
            Some(_) => ctx.clone(),
            None => ctx.clone().with_representation(id.clone()),
        };
        registry.with_timeline(id, |timeline| {
            self.convert_detailed(data, &ctx, timeline, dvr_window_secs)
        })?
    }
}

fn check_required(tree: &BoxTree) -> Result<()> {
    let moof = tree
        .child(BoxKind::Moof)
        .ok_or(Error::MissingRequiredBox("moof"))?;
    tree.child(BoxKind::Mdat)
        .ok_or(Error::MissingRequiredBox("mdat"))?;
    let traf = moof
        .child(BoxKind::Traf)
        .ok_or(Error::MissingRequiredBox("traf"))?;
    traf.child(BoxKind::Trun)
        .and_then(Mp4Box::as_trun)
        .ok_or(Error::MissingRequiredBox("trun"))?;
    traf.child(BoxKind::Tfhd)
        .and_then(Mp4Box::as_tfhd)
        .ok_or(Error::MissingRequiredBox("tfhd"))?;
    Ok(())
}

fn traf_mut(tree: &mut BoxTree) -> Result<&mut Mp4Box> {
    tree.child_mut(BoxKind::Moof)
        .ok_or(Error::MissingRequiredBox("moof"))?
        .child_mut(BoxKind::Traf)
        .ok_or(Error::MissingRequiredBox("traf"))
}

/// Decode time of the fragment, adding a `tfdt` right after `tfhd` when
/// the fragment has none.
fn ensure_tfdt(traf: &mut Mp4Box, ctx: &FragmentContext) -> u64 {
    if let Some(tfdt) = traf.child(BoxKind::Tfdt).and_then(Mp4Box::as_tfdt) {
        return tfdt.base_media_decode_time;
    }
    let decode_time = secs_to_ticks(ctx.start_time, ctx.timescale as u64);
    traf.insert_child_after(
        BoxKind::Tfhd,
        Mp4Box::from_record(BoxKind::Tfdt, Record::Tfdt(Tfdt::new(decode_time))),
    );
    debug!(decode_time, "synthesized tfdt");
    decode_time
}

/// Make sample data addressing relative to `moof`.
fn normalize_flags(traf: &mut Mp4Box) {
    if let Some(tfhd) = traf.child_mut(BoxKind::Tfhd).and_then(Mp4Box::as_tfhd_mut) {
        tfhd.flags = (tfhd.flags & !Tfhd::BASE_DATA_OFFSET_PRESENT) | Tfhd::DEFAULT_BASE_IS_MOOF;
    }
    if let Some(trun) = traf.child_mut(BoxKind::Trun).and_then(Mp4Box::as_trun_mut) {
        trun.flags |= Trun::DATA_OFFSET_PRESENT;
        trun.data_offset = 0;
    }
}

fn repeat_mdat(tree: &mut BoxTree, copies: usize) {
    let Some(mdat) = tree.child_mut(BoxKind::Mdat) else {
        return;
    };
    let Some(sample) = mdat.data().cloned() else {
        return;
    };
    let mut buf = BytesMut::with_capacity(sample.len() * copies);
    for _ in 0..copies {
        buf.put_slice(&sample);
    }
    *mdat.body_mut() = BoxBody::Opaque(buf.freeze());
}

/// Point `trun.data_offset` at the first byte of `mdat` data. The fragment
/// starts with `moof`, so this is also the offset from the `moof` base.
fn set_data_offset(tree: &mut BoxTree) -> Result<()> {
    let (Some(mdat_offset), Some(mdat)) = (
        tree.byte_offset_of(BoxKind::Mdat),
        tree.child(BoxKind::Mdat),
    ) else {
        return Err(Error::MissingRequiredBox("mdat"));
    };
    let offset = mdat_offset + mdat.header_len();
    let offset = i32::try_from(offset)
        .map_err(|_| Error::malformed(format!("data offset {offset} does not fit in trun")))?;

    if let Some(trun) = traf_mut(tree)?
        .child_mut(BoxKind::Trun)
        .and_then(Mp4Box::as_trun_mut)
    {
        trun.data_offset = offset;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{Tfrf, TrunSample};
    use crate::timeline::Segment;

    const S: u64 = mss_core::TICKS_PER_SECOND;

    fn fragment(traf_children: Vec<Mp4Box>, payload: &[u8]) -> Vec<u8> {
        BoxTree::from_boxes(vec![
            Mp4Box::container(
                BoxKind::Moof,
                vec![Mp4Box::container(BoxKind::Traf, traf_children)],
            ),
            Mp4Box::mdat(payload.to_vec()),
        ])
        .serialize()
    }

    fn tfhd() -> Mp4Box {
        let tfhd = Tfhd {
            flags: Tfhd::BASE_DATA_OFFSET_PRESENT,
            track_id: 9,
            base_data_offset: 1234,
            ..Default::default()
        };
        Mp4Box::from_record(BoxKind::Tfhd, Record::Tfhd(tfhd))
    }

    fn trun(durations: &[u32]) -> Mp4Box {
        let trun = Trun {
            flags: Trun::SAMPLE_DURATION_PRESENT | Trun::SAMPLE_SIZE_PRESENT,
            samples: durations
                .iter()
                .map(|&duration| TrunSample {
                    duration,
                    size: 4,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        Mp4Box::from_record(BoxKind::Trun, Record::Trun(trun))
    }

    fn tfrf(entries: &[(u64, u64)]) -> Mp4Box {
        let entries = entries
            .iter()
            .map(|&(absolute_time, duration)| TfrfEntry {
                absolute_time,
                duration,
            })
            .collect();
        Mp4Box::from_record(BoxKind::Tfrf, Record::Tfrf(Tfrf::new(entries)))
    }

    fn ctx() -> FragmentContext {
        FragmentContext::new(1, 10_000_000).with_timing(4.0, 2.0)
    }

    #[test]
    fn missing_boxes_are_named() {
        let transcoder = FragmentTranscoder::new();
        let mut tl = Timeline::default();

        let no_trun = fragment(vec![tfhd()], b"data");
        let err = transcoder.convert(&no_trun, &ctx(), &mut tl, 0.0).unwrap_err();
        assert!(matches!(err, Error::MissingRequiredBox("trun")));

        let no_tfhd = fragment(vec![trun(&[10])], b"data");
        let err = transcoder.convert(&no_tfhd, &ctx(), &mut tl, 0.0).unwrap_err();
        assert!(matches!(err, Error::MissingRequiredBox("tfhd")));

        let moof_only = BoxTree::from_boxes(vec![Mp4Box::container(BoxKind::Moof, vec![])]);
        let err = transcoder
            .convert(&moof_only.serialize(), &ctx(), &mut tl, 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::MissingRequiredBox("mdat")));
    }

    #[test]
    fn header_and_run_are_normalized() {
        let input = fragment(vec![tfhd(), trun(&[20_000_000])], b"abcd");
        let out = FragmentTranscoder::new()
            .convert(&input, &ctx(), &mut Timeline::default(), 0.0)
            .unwrap();

        let tree = BoxTree::parse(&out).unwrap();
        let traf = tree.child(BoxKind::Moof).unwrap().child(BoxKind::Traf).unwrap();
        let tfhd = traf.child(BoxKind::Tfhd).and_then(Mp4Box::as_tfhd).unwrap();
        assert_eq!(tfhd.track_id, 1);
        assert_eq!(tfhd.flags & Tfhd::BASE_DATA_OFFSET_PRESENT, 0);
        assert_ne!(tfhd.flags & Tfhd::DEFAULT_BASE_IS_MOOF, 0);

        let kinds: Vec<_> = traf.children().iter().map(Mp4Box::kind).collect();
        assert_eq!(kinds, vec![BoxKind::Tfhd, BoxKind::Tfdt, BoxKind::Trun]);
        let tfdt = traf.child(BoxKind::Tfdt).and_then(Mp4Box::as_tfdt).unwrap();
        assert_eq!(tfdt.base_media_decode_time, 4 * S);

        let trun = traf.child(BoxKind::Trun).and_then(Mp4Box::as_trun).unwrap();
        let mdat_data = tree.byte_offset_of(BoxKind::Mdat).unwrap() + 8;
        assert_eq!(trun.data_offset as u64, mdat_data);
        assert_eq!(&out[mdat_data as usize..], b"abcd");
    }

    #[test]
    fn live_hints_extend_timeline_and_are_removed() {
        let input = fragment(
            vec![tfhd(), trun(&[20_000_000]), tfrf(&[(6 * S, 2 * S)])],
            b"abcd",
        );
        let mut tl = Timeline::from_segments([Segment::new(2 * S, 2 * S), Segment::new(4 * S, 2 * S)]);

        let converted = FragmentTranscoder::new()
            .convert_detailed(&input, &ctx(), &mut tl, 0.0)
            .unwrap();

        assert_eq!(converted.sync.appended, 1);
        assert_eq!(tl.len(), 3);
        assert_eq!(tl.last().unwrap().t, 6 * S);

        let tree = BoxTree::parse(&converted.data).unwrap();
        let traf = tree.child(BoxKind::Moof).unwrap().child(BoxKind::Traf).unwrap();
        assert!(traf.child(BoxKind::Tfrf).is_none());
    }

    #[test]
    fn failed_conversion_leaves_timeline_alone() {
        let mut tl = Timeline::from_segments([Segment::new(0, S)]);
        let before = tl.clone();
        let input = fragment(vec![tfrf(&[(S, S)])], b"abcd");

        assert!(FragmentTranscoder::new()
            .convert(&input, &ctx(), &mut tl, 0.0)
            .is_err());
        assert_eq!(tl, before);
    }

    #[test]
    fn conversion_is_deterministic() {
        let input = fragment(vec![tfhd(), trun(&[10, 10])], b"abcdefgh");
        let transcoder = FragmentTranscoder::new();
        let a = transcoder
            .convert(&input, &ctx(), &mut Timeline::default(), 0.0)
            .unwrap();
        let b = transcoder
            .convert(&input, &ctx(), &mut Timeline::default(), 0.0)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn registered_conversion_reports_under_representation() {
        use mss_core::events::EventBus;

        let bus = Arc::new(EventBus::default());
        let transcoder = FragmentTranscoder::with_reporter(bus.clone());
        let registry = TimelineRegistry::new();
        let id = RepresentationId::new("video_2000000");
        registry.insert(
            id.clone(),
            Timeline::from_segments((0..3).map(|i| Segment::new(i * 2 * S, 2 * S))),
        );

        let input = fragment(
            vec![tfhd(), trun(&[20_000_000]), tfrf(&[(6 * S, 2 * S)])],
            b"abcd",
        );
        let converted = transcoder
            .convert_registered(&registry, &id, &input, &ctx(), 4.0)
            .unwrap();

        assert_eq!(converted.sync.appended, 1);
        // last t = 6s, window 4s: segment at 0s is dropped.
        assert_eq!(converted.sync.trimmed, 1);
        assert_eq!(registry.snapshot(&id).unwrap().first().unwrap().t, 2 * S);
        let range = bus.last_dvr_range(&id).unwrap();
        assert_eq!(range.start_secs, 2.0);
        assert_eq!(range.end_secs, 8.0);
    }

    #[test]
    fn unknown_representation_is_not_found() {
        let input = fragment(vec![tfhd(), trun(&[10])], b"abcd");
        let err = FragmentTranscoder::new()
            .convert_registered(
                &TimelineRegistry::new(),
                &RepresentationId::new("missing"),
                &input,
                &ctx(),
                0.0,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
