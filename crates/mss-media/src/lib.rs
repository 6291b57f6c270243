//! mss-media: Smooth Streaming fragment remuxing and live timeline upkeep.
//!
//! Smooth Streaming servers deliver PIFF fragments that standard fMP4
//! players cannot consume as-is. This crate rewrites them and keeps each
//! representation's segment timeline in step with the live edge.
//!
//! # Modules
//!
//! - [`boxes`] - ISO BMFF box tree: parsing, editing and serialization
//! - [`fragment`] - PIFF to fMP4 fragment conversion
//! - [`timeline`] - Segment timelines, live hint synchronization and availability
//! - [`manifest`] - Segment lists from manifest chunk descriptors, URL templates

pub mod boxes;
pub mod fragment;
pub mod manifest;
pub mod timeline;

// Re-export commonly used items at the crate root.
pub use boxes::{BoxKind, BoxTree, Mp4Box, TfrfEntry};
pub use fragment::{ConvertedFragment, FragmentContext, FragmentTranscoder};
pub use manifest::{Chunk, ClipBounds, SegmentList, SegmentListBuilder, SegmentTemplate};
pub use timeline::{
    availability_range, AvailabilityRange, LiveTimelineSynchronizer, Segment, SyncOutcome,
    Timeline, TimelineRegistry,
};
