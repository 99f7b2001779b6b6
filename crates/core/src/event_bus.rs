//! Realtime fan-out seam — trait for publishing dispatch events and
//! progress snapshots to subscriber topics.
//!
//! Modules accept an `Arc<dyn RealtimeSink>` so the transport (websocket
//! hub, broker bridge) stays external to the dispatch core.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Event name for per-recipient dispatch updates.
pub const DISPATCH_EVENT: &str = "dispatch.event";
/// Event name for campaign counter snapshots.
pub const CAMPAIGN_PROGRESS: &str = "campaign.progress";
/// Event name for user-directed notifications.
pub const NOTIFICATION: &str = "notification";

/// Topic for a campaign's subscribers.
pub fn campaign_topic(campaign_id: Uuid) -> String {
    format!("campaign:{campaign_id}")
}

/// Topic for a user's notifications.
pub fn user_topic(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

/// Trait for pushing realtime payloads. Implementations route to the
/// actual transport; subscription management is out of scope here.
pub trait RealtimeSink: Send + Sync {
    fn publish(&self, topic: &str, event: &str, payload: Value);
}

/// No-op sink for wiring paths that do not need realtime output.
pub struct NoOpSink;

impl RealtimeSink for NoOpSink {
    fn publish(&self, _topic: &str, _event: &str, _payload: Value) {}
}

/// A single captured publication.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

/// In-memory sink that captures publications for testing.
#[derive(Default)]
pub struct CaptureSink {
    published: Mutex<Vec<PublishedEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published.lock().expect("realtime sink mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().expect("realtime sink mutex poisoned").len()
    }

    pub fn count_event(&self, event: &str) -> usize {
        self.published
            .lock()
            .expect("realtime sink mutex poisoned")
            .iter()
            .filter(|e| e.event == event)
            .count()
    }

    pub fn clear(&self) {
        self.published.lock().expect("realtime sink mutex poisoned").clear();
    }
}

impl RealtimeSink for CaptureSink {
    fn publish(&self, topic: &str, event: &str, payload: Value) {
        self.published
            .lock()
            .expect("realtime sink mutex poisoned")
            .push(PublishedEvent {
                topic: topic.to_string(),
                event: event.to_string(),
                payload,
            });
    }
}

/// Convenience: a no-op sink for modules that don't need realtime output.
pub fn noop_sink() -> Arc<dyn RealtimeSink> {
    Arc::new(NoOpSink)
}

/// Convenience: a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
