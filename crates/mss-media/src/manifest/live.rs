//! Wall-clock helpers for live presentations.

use chrono::{DateTime, Duration, Utc};
use mss_core::{ticks_to_secs, TICKS_PER_SECOND};

use crate::timeline::Timeline;

/// Time-shift buffer depth, in seconds, for a manifest `DVRWindowLength`
/// given in 100 ns ticks.
pub fn time_shift_buffer_depth_secs(dvr_window_length: u64) -> f64 {
    ticks_to_secs(dvr_window_length, TICKS_PER_SECOND)
}

/// Wall-clock instant at which presentation time zero was available.
///
/// Each timeline's first segment is taken to be available `now`, so the
/// presentation started `first.t` seconds earlier. The earliest such
/// instant across all timelines, pushed back by the time-shift buffer,
/// is the availability start. `None` when no timeline has segments.
pub fn availability_start_time<'a>(
    timelines: impl IntoIterator<Item = &'a Timeline>,
    now: DateTime<Utc>,
    time_shift_buffer_depth_secs: f64,
) -> Option<DateTime<Utc>> {
    let earliest = timelines
        .into_iter()
        .filter_map(Timeline::start_secs)
        .map(|first_secs| now - millis(first_secs))
        .min()?;
    Some(earliest - millis(time_shift_buffer_depth_secs))
}

fn millis(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}
