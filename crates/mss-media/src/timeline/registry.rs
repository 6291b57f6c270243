//! Timelines keyed by representation.
//!
//! Each timeline sits behind its own mutex so that representations can be
//! processed in parallel while every read-modify-write of one timeline is
//! serialized.

use mss_core::{Error, RepresentationId, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::Timeline;

/// Shared handle to one representation's timeline.
pub type TimelineHandle = Arc<Mutex<Timeline>>;

#[derive(Debug, Default)]
pub struct TimelineRegistry {
    entries: RwLock<HashMap<RepresentationId, TimelineHandle>>,
}

impl TimelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the timeline for `id`.
    pub fn insert(&self, id: RepresentationId, timeline: Timeline) -> TimelineHandle {
        let handle = Arc::new(Mutex::new(timeline));
        self.entries.write().insert(id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: &RepresentationId) -> Option<TimelineHandle> {
        self.entries.read().get(id).cloned()
    }

    pub fn remove(&self, id: &RepresentationId) -> Option<TimelineHandle> {
        self.entries.write().remove(id)
    }

    pub fn contains(&self, id: &RepresentationId) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<RepresentationId> {
        let mut ids: Vec<_> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `f` with the timeline of `id` locked.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when `id` is not registered.
    pub fn with_timeline<T>(
        &self,
        id: &RepresentationId,
        f: impl FnOnce(&mut Timeline) -> T,
    ) -> Result<T> {
        let handle = self
            .get(id)
            .ok_or_else(|| Error::not_found("representation", id))?;
        let mut timeline = handle.lock();
        Ok(f(&mut timeline))
    }

    /// Copy of the timeline of `id`.
    pub fn snapshot(&self, id: &RepresentationId) -> Option<Timeline> {
        self.get(id).map(|handle| handle.lock().clone())
    }
}
