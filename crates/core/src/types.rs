use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle of a campaign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    /// Closed transition table for campaign lifecycle changes.
    pub fn can_transition(self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, to),
            (Draft, Scheduled)
                | (Draft, Running)
                | (Scheduled, Running)
                | (Paused, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

/// Lifecycle of a recipient run or a step run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Closed transition table for run state changes. The two edges back
    /// to `Pending` are the retry path: a failed step run is reset, and
    /// its recipient run is returned from processing to pending.
    pub fn can_transition(self, to: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Success)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, Pending)
                | (Failed, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignMode {
    Test,
    Live,
}

/// A time-of-day interval in which sends are permitted. Windows where
/// `start > end` wrap past midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }
}

/// Serde adapter for the `HH:mm` wire format of window bounds. Anything
/// that does not parse is rejected at configuration load.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Anti-ban pacing configuration attached to a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiBanConfig {
    pub min_interval_seconds: u32,
    pub max_interval_seconds: u32,
    /// A long pause is inserted after every `long_pause_every` messages.
    pub long_pause_every: u32,
    pub long_pause_min_seconds: u32,
    pub long_pause_max_seconds: u32,
    pub daily_limit: u32,
    #[serde(default)]
    pub allowed_windows: Vec<TimeWindow>,
}

/// Mutable pacing counters embedded in a campaign. The dispatch worker is
/// the sole mutator after campaign creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiBanState {
    /// Schema version of this structure, bumped on layout changes.
    pub version: u32,
    pub messages_sent: u64,
    pub daily_count: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_long_pause_at: Option<DateTime<Utc>>,
    /// Hard gate: no send is permitted before this instant.
    pub next_available_at: Option<DateTime<Utc>>,
}

impl Default for AntiBanState {
    fn default() -> Self {
        Self {
            version: 1,
            messages_sent: 0,
            daily_count: 0,
            last_sent_at: None,
            last_long_pause_at: None,
            next_available_at: None,
        }
    }
}

/// Jitter computed for the pause after a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntiBanDelay {
    pub base_ms: u64,
    pub long_pause_ms: u64,
    pub total_ms: u64,
}

/// A configured multi-step outbound messaging run against a contact list
/// through one messaging instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub mode: CampaignMode,
    pub test_sample_size: Option<u32>,
    pub schedule_at: Option<DateTime<Utc>>,
    pub instance_id: Uuid,
    pub anti_ban: AntiBanConfig,
    pub anti_ban_state: AntiBanState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One step of a campaign's message sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStep {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// 1-based, unique within the campaign.
    pub order: u32,
    pub template_id: Uuid,
    /// Jitter window applied before this step runs.
    pub delay_min_seconds: u32,
    pub delay_max_seconds: u32,
    pub wait_for_reply_seconds: Option<u32>,
    pub cancel_if_reply: bool,
    pub skip_if_auto_reply: bool,
    /// Fixed typing-simulation override; when absent the worker derives it
    /// from the message length.
    pub typing_ms_override: Option<u64>,
    pub ai_variation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
}

/// A connected messaging provider instance a campaign sends through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingInstance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
}

/// Per-contact execution record of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientRun {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub status: RunStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Most recent rendered message.
    pub message_body: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-contact, per-campaign-step execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: Uuid,
    pub recipient_run_id: Uuid,
    pub campaign_step_id: Uuid,
    pub status: RunStatus,
    /// None until a job has been placed in the queue for this step run —
    /// the sole guard against duplicate enqueue. Cleared back to None only
    /// when the run is returned to pending for retry.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only trail entry for a recipient run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchLogEntry {
    pub id: Uuid,
    pub recipient_run_id: Uuid,
    pub status: RunStatus,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// The unit of work carried by the delayed job queue. The queue itself
/// does not deduplicate; `StepRun::scheduled_at` does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchJob {
    pub campaign_id: Uuid,
    pub recipient_run_id: Uuid,
    pub campaign_step_id: Uuid,
    pub step_run_id: Uuid,
    pub step_order: u32,
    pub attempt: u32,
}

/// Realtime payload published on `campaign:{id}` after each run change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub recipient_run_id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub status: RunStatus,
    pub message: Option<String>,
    pub error: Option<String>,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// Realtime snapshot of campaign counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub campaign_id: Uuid,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
    pub status: CampaignStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Error,
}

/// Result of probing a messaging instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub instance_id: Uuid,
    pub status: ConnectionStatus,
    pub message: Option<String>,
}
