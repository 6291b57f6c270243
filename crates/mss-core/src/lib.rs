//! mss-core: shared types, errors, configuration, and the DVR event bus.
//!
//! This crate is the foundational dependency for `mss-media` and the
//! `mss-remux` binary, providing the error taxonomy for fragment conversion,
//! typed representation identifiers, media-domain enums and clock constants,
//! application configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
