//! Fragment URL templates.
//!
//! Stream URLs look like `QualityLevels({bitrate})/Fragments(video={start time})`.

use mss_core::MediaType;

use crate::timeline::Segment;

const BITRATE: &str = "{bitrate}";
const START_TIME: &str = "{start time}";

/// URL template of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTemplate {
    url: String,
}

impl SegmentTemplate {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// URL of `segment` at `bitrate`. Clip segments are addressed by their
    /// original start time.
    pub fn media_url(&self, bitrate: u64, segment: &Segment) -> String {
        self.url
            .replace(BITRATE, &bitrate.to_string())
            .replace(START_TIME, &segment.request_time().to_string())
    }

    /// The same template with DASH `$Bandwidth$` / `$Time$` identifiers.
    pub fn to_dash(&self) -> String {
        self.url
            .replace(BITRATE, "$Bandwidth$")
            .replace(START_TIME, "$Time$")
    }
}

/// Keyframe-only variant of a fragment URL, used for trick play. Only audio
/// and video streams have one; other URLs are returned unchanged.
pub fn keyframe_url(url: &str, media_type: MediaType) -> String {
    if media_type.is_av() {
        url.replacen("Fragments", "KeyFrames", 1)
    } else {
        url.to_string()
    }
}
