//! In-memory store for campaigns, contacts, runs, and the blacklist.
//!
//! This is the reference implementation of the read/write collaborator
//! the dispatch engine is built against. Keyed state lives in `DashMap`s;
//! the duplicate-enqueue guard (`StepRun::scheduled_at`) is claimed under
//! the map's shard lock so two concurrent scheduling passes cannot both
//! win the same step run.

pub mod blacklist;
pub mod runs;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dispatch_core::error::{DispatchError, DispatchResult};
use dispatch_core::types::{
    Campaign, CampaignStep, CampaignStatus, Contact, DispatchLogEntry, MessageTemplate,
    MessagingInstance, RecipientRun, RunStatus, StepRun,
};
use uuid::Uuid;

pub use blacklist::BlacklistEntry;
pub use runs::{RunOutcome, ScheduleCandidate, StatusCounts, StepRunContext};

/// Process-scoped store shared across scheduler, worker, and lifecycle
/// services via `Arc`.
#[derive(Default)]
pub struct Store {
    pub(crate) campaigns: DashMap<Uuid, Campaign>,
    pub(crate) campaign_steps: DashMap<Uuid, CampaignStep>,
    pub(crate) templates: DashMap<Uuid, MessageTemplate>,
    pub(crate) contacts: DashMap<Uuid, Contact>,
    pub(crate) instances: DashMap<Uuid, MessagingInstance>,
    pub(crate) recipient_runs: DashMap<Uuid, RecipientRun>,
    pub(crate) step_runs: DashMap<Uuid, StepRun>,
    pub(crate) blacklist: DashMap<(Uuid, String), blacklist::BlacklistEntry>,
    pub(crate) dispatch_logs: DashMap<Uuid, Vec<DispatchLogEntry>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reference data ────────────────────────────────────────────────

    pub fn insert_template(&self, template: MessageTemplate) {
        self.templates.insert(template.id, template);
    }

    pub fn template(&self, id: Uuid) -> Option<MessageTemplate> {
        self.templates.get(&id).map(|t| t.clone())
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.contacts.insert(contact.id, contact);
    }

    pub fn contact(&self, id: Uuid) -> Option<Contact> {
        self.contacts.get(&id).map(|c| c.clone())
    }

    pub fn insert_instance(&self, instance: MessagingInstance) {
        self.instances.insert(instance.id, instance);
    }

    pub fn instance(&self, id: Uuid) -> Option<MessagingInstance> {
        self.instances.get(&id).map(|i| i.clone())
    }

    // ── Campaigns ─────────────────────────────────────────────────────

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id, campaign);
    }

    pub fn campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|c| c.clone())
    }

    /// Campaigns in `Scheduled` status whose start time has passed.
    pub fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> Vec<Campaign> {
        self.campaigns
            .iter()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled
                    && c.schedule_at.is_some_and(|at| at <= now)
            })
            .map(|c| c.clone())
            .collect()
    }

    /// Move a campaign through its transition table.
    pub fn set_campaign_status(&self, id: Uuid, to: CampaignStatus) -> DispatchResult<()> {
        let mut campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("campaign {id}")))?;

        if !campaign.status.can_transition(to) {
            return Err(DispatchError::InvalidTransition {
                entity: "campaign",
                from: format!("{:?}", campaign.status),
                to: format!("{to:?}"),
            });
        }

        campaign.status = to;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    /// Persist the pacing counters after a successful send. The worker is
    /// the only caller.
    pub fn update_anti_ban_state(
        &self,
        campaign_id: Uuid,
        state: dispatch_core::types::AntiBanState,
    ) -> DispatchResult<()> {
        let mut campaign = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| DispatchError::NotFound(format!("campaign {campaign_id}")))?;
        campaign.anti_ban_state = state;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    pub fn insert_campaign_step(&self, step: CampaignStep) {
        self.campaign_steps.insert(step.id, step);
    }

    pub fn campaign_step(&self, id: Uuid) -> Option<CampaignStep> {
        self.campaign_steps.get(&id).map(|s| s.clone())
    }

    /// All steps of a campaign, ascending by order.
    pub fn steps_for_campaign(&self, campaign_id: Uuid) -> Vec<CampaignStep> {
        let mut steps: Vec<_> = self
            .campaign_steps
            .iter()
            .filter(|s| s.campaign_id == campaign_id)
            .map(|s| s.clone())
            .collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    // ── Dispatch log trail ────────────────────────────────────────────

    pub fn add_dispatch_log(&self, recipient_run_id: Uuid, status: RunStatus, detail: Option<&str>) {
        self.dispatch_logs
            .entry(recipient_run_id)
            .or_default()
            .push(DispatchLogEntry {
                id: Uuid::new_v4(),
                recipient_run_id,
                status,
                detail: detail.map(str::to_string),
                at: Utc::now(),
            });
    }

    pub fn logs_for_run(&self, recipient_run_id: Uuid) -> Vec<DispatchLogEntry> {
        self.dispatch_logs
            .get(&recipient_run_id)
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}
