//! Trick-mode sample duplication.
//!
//! Keyframe-only requests return one sample per fragment. Players expect
//! the fragment to cover its nominal duration, so the single sample is
//! repeated until it does.

use mss_core::secs_to_ticks;
use tracing::{debug, warn};

use crate::boxes::{BoxKind, Mp4Box, Tfhd};

/// Repeat the single sample of `traf` to fill `duration_secs`.
///
/// Returns how many copies of the media data the `mdat` must now hold, or
/// `None` when the run was left as is.
pub(crate) fn replicate_single_sample(
    traf: &mut Mp4Box,
    duration_secs: f64,
    timescale: u32,
) -> Option<usize> {
    let default_duration = traf
        .child(BoxKind::Tfhd)
        .and_then(Mp4Box::as_tfhd)
        .and_then(Tfhd::default_duration);
    let full_ticks = secs_to_ticks(duration_secs, timescale as u64);

    let trun = traf.child_mut(BoxKind::Trun).and_then(Mp4Box::as_trun_mut)?;
    if trun.samples.len() != 1 {
        debug!(samples = trun.samples.len(), "trick mode skipped: run is not a single sample");
        return None;
    }

    let per_sample_durations = trun.has_sample_durations();
    let template = trun.samples[0];
    let single = if per_sample_durations {
        template.duration
    } else {
        default_duration.unwrap_or(0)
    };
    if single == 0 {
        warn!("trick mode skipped: sample has no duration");
        return None;
    }
    let target = (full_ticks / single as u64) as usize;
    if target == 0 {
        warn!(
            full_ticks,
            sample_duration = single,
            "trick mode skipped: fragment shorter than its sample"
        );
        return None;
    }

    trun.samples.resize(target, template);
    if per_sample_durations {
        let remainder = full_ticks - single as u64 * target as u64;
        if let Some(last) = trun.samples.last_mut() {
            last.duration = (single as u64 + remainder).min(u32::MAX as u64) as u32;
        }
    }

    let mut aux_entries = target;
    if let Some(senc) = traf
        .child_mut(BoxKind::Senc)
        .and_then(Mp4Box::as_sample_encryption_mut)
    {
        senc.samples.truncate(1);
        if let Some(first) = senc.samples.first().cloned() {
            senc.samples.resize(target, first);
        }
        aux_entries = senc.samples.len();
    }
    if let Some(saiz) = traf.child_mut(BoxKind::Saiz).and_then(Mp4Box::as_saiz_mut) {
        if saiz.default_sample_info_size == 0 {
            saiz.sample_info_sizes.truncate(1);
            if let Some(&first) = saiz.sample_info_sizes.first() {
                saiz.sample_info_sizes.resize(aux_entries, first);
            }
        }
        saiz.sample_count = aux_entries as u32;
    }

    debug!(copies = target, sample_duration = single, "replicated trick-mode sample");
    Some(target)
}
