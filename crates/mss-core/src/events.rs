//! Timeline event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers (a metrics
//! collector attached after playback started) can catch up. It is also the
//! stock [`DvrReporter`] handed to the live timeline synchronizer.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::ids::{EventId, RepresentationId};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// DvrRange / DvrReporter
// ---------------------------------------------------------------------------

/// Presentation range currently retained by a live representation, in
/// seconds of the representation's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DvrRange {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl DvrRange {
    /// Length of the retained window.
    pub fn duration_secs(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }
}

/// Receiver of DVR window updates produced while a live timeline is
/// synchronized.
pub trait DvrReporter: Send + Sync {
    fn report_dvr_range(&self, representation: &RepresentationId, range: DvrRange);

    /// Live hints extended the timeline.
    fn segments_appended(
        &self,
        _representation: &RepresentationId,
        _count: usize,
        _live_edge_secs: f64,
    ) {
    }

    /// Segments fell out of the DVR window.
    fn segments_trimmed(&self, _representation: &RepresentationId, _count: usize) {}
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The DVR window of a representation moved.
    DvrRangeUpdated {
        representation: RepresentationId,
        range: DvrRange,
    },
    /// Live hints revealed segments past the manifest's last entry.
    SegmentsAppended {
        representation: RepresentationId,
        count: usize,
        live_edge_secs: f64,
    },
    /// Segments fell out of the DVR window.
    SegmentsTrimmed {
        representation: RepresentationId,
        count: usize,
    },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh ID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Latest DVR range reported for `representation`, if any is still in
    /// the ring buffer.
    pub fn last_dvr_range(&self, representation: &RepresentationId) -> Option<DvrRange> {
        let recent = self.recent.read();
        recent.iter().find_map(|event| match &event.payload {
            EventPayload::DvrRangeUpdated {
                representation: r,
                range,
            } if r == representation => Some(*range),
            _ => None,
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DvrReporter for EventBus {
    fn report_dvr_range(&self, representation: &RepresentationId, range: DvrRange) {
        self.broadcast(EventPayload::DvrRangeUpdated {
            representation: representation.clone(),
            range,
        });
    }

    fn segments_appended(
        &self,
        representation: &RepresentationId,
        count: usize,
        live_edge_secs: f64,
    ) {
        self.broadcast(EventPayload::SegmentsAppended {
            representation: representation.clone(),
            count,
            live_edge_secs,
        });
    }

    fn segments_trimmed(&self, representation: &RepresentationId, count: usize) {
        self.broadcast(EventPayload::SegmentsTrimmed {
            representation: representation.clone(),
            count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> RepresentationId {
        RepresentationId::new("video_0")
    }

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.broadcast(EventPayload::SegmentsTrimmed {
            representation: video(),
            count: 3,
        });

        let event = rx.try_recv().unwrap();
        match &event.payload {
            EventPayload::SegmentsTrimmed { representation, count } => {
                assert_eq!(representation, &video());
                assert_eq!(*count, 3);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::new(256);
        for count in 0..150 {
            bus.broadcast(EventPayload::SegmentsTrimmed {
                representation: video(),
                count,
            });
        }

        let recent = bus.recent_events(200);
        assert_eq!(recent.len(), MAX_RECENT_EVENTS);
        match &recent[0].payload {
            EventPayload::SegmentsTrimmed { count, .. } => assert_eq!(*count, 149),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn dvr_reporter_records_latest_range() {
        let bus = EventBus::default();
        bus.report_dvr_range(&video(), DvrRange { start_secs: 0.0, end_secs: 10.0 });
        bus.report_dvr_range(&video(), DvrRange { start_secs: 2.0, end_secs: 12.0 });
        bus.report_dvr_range(
            &RepresentationId::new("audio_0"),
            DvrRange { start_secs: 5.0, end_secs: 6.0 },
        );

        let range = bus.last_dvr_range(&video()).unwrap();
        assert_eq!(range, DvrRange { start_secs: 2.0, end_secs: 12.0 });
        assert_eq!(range.duration_secs(), 10.0);
        assert!(bus.last_dvr_range(&RepresentationId::new("text_0")).is_none());
    }

    #[test]
    fn reporter_hooks_broadcast_timeline_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.segments_appended(&video(), 2, 40.0);
        bus.segments_trimmed(&video(), 1);

        assert!(matches!(
            rx.try_recv().unwrap().payload,
            EventPayload::SegmentsAppended { count: 2, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap().payload,
            EventPayload::SegmentsTrimmed { count: 1, .. }
        ));
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let payload = EventPayload::SegmentsAppended {
            representation: video(),
            count: 2,
            live_edge_secs: 42.0,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "segments_appended");
        assert_eq!(json["representation"], "video_0");
    }
}
