//! Progress aggregation and realtime publication.

use dispatch_core::event_bus::{
    campaign_topic, user_topic, RealtimeSink, CAMPAIGN_PROGRESS, DISPATCH_EVENT, NOTIFICATION,
};
use dispatch_core::types::{CampaignProgress, DispatchEvent};
use dispatch_store::Store;
use std::sync::Arc;
use uuid::Uuid;

/// Recomputes campaign counters and publishes snapshots and per-run
/// events. Called by the worker after every state-changing step.
pub struct ProgressNotifier {
    store: Arc<Store>,
    sink: Arc<dyn RealtimeSink>,
}

impl ProgressNotifier {
    pub fn new(store: Arc<Store>, sink: Arc<dyn RealtimeSink>) -> Self {
        Self { store, sink }
    }

    /// Publish a fresh counter snapshot for the campaign. A missing
    /// campaign is a stale reference, not an error.
    pub fn emit_progress(&self, campaign_id: Uuid) {
        let Some(campaign) = self.store.campaign(campaign_id) else {
            return;
        };
        let counts = self.store.status_counts(campaign_id);

        let progress = CampaignProgress {
            campaign_id,
            total: counts.total,
            completed: counts.success,
            failed: counts.failed,
            in_flight: counts.processing,
            status: campaign.status,
        };

        match serde_json::to_value(&progress) {
            Ok(payload) => {
                self.sink
                    .publish(&campaign_topic(campaign_id), CAMPAIGN_PROGRESS, payload);
            }
            Err(error) => {
                tracing::error!(%campaign_id, %error, "failed to encode progress snapshot");
            }
        }
    }

    /// Publish the latest state of one recipient run.
    pub fn emit_dispatch_event(&self, recipient_run_id: Uuid) {
        let Some(run) = self.store.recipient_run(recipient_run_id) else {
            return;
        };

        let event = DispatchEvent {
            recipient_run_id: run.id,
            campaign_id: run.campaign_id,
            contact_id: run.contact_id,
            status: run.status,
            message: run.message_body.clone(),
            error: run.error_message.clone(),
            attempt: run.attempt_count,
            timestamp: run.updated_at,
        };

        match serde_json::to_value(&event) {
            Ok(payload) => {
                self.sink
                    .publish(&campaign_topic(run.campaign_id), DISPATCH_EVENT, payload);
            }
            Err(error) => {
                tracing::error!(%recipient_run_id, %error, "failed to encode dispatch event");
            }
        }
    }

    /// Push a free-form notification to a user's topic.
    pub fn notify_user(&self, user_id: Uuid, kind: &str, message: &str) {
        self.sink.publish(
            &user_topic(user_id),
            NOTIFICATION,
            serde_json::json!({ "type": kind, "message": message }),
        );
    }
}
