//! Recipient runs and step runs: creation, status transitions with the
//! validated table, the atomic schedule claim, and the candidate queries
//! the scheduler and worker are built on.

use chrono::{DateTime, Utc};
use dispatch_core::error::{DispatchError, DispatchResult};
use dispatch_core::types::{
    Campaign, CampaignStep, Contact, MessageTemplate, MessagingInstance, RecipientRun, RunStatus,
    StepRun,
};
use uuid::Uuid;

use crate::Store;

/// Optional fields carried along a status change.
#[derive(Debug, Default, Clone)]
pub struct RunOutcome {
    pub message: Option<String>,
    pub error: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl RunOutcome {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            error: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn payload(value: serde_json::Value) -> Self {
        Self {
            payload: Some(value),
            ..Self::default()
        }
    }
}

/// A step run eligible for scheduling, joined with what the scheduler
/// needs to build the job.
#[derive(Debug, Clone)]
pub struct ScheduleCandidate {
    pub step_run: StepRun,
    pub step: CampaignStep,
    pub recipient_run_id: Uuid,
    pub attempt_count: u32,
}

/// Recipient-run counters for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn terminal(&self) -> u64 {
        self.success + self.failed + self.cancelled
    }

    /// Every run terminal and none failed.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.terminal() == self.total && self.failed == 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Everything the worker loads before touching a job.
#[derive(Debug, Clone)]
pub struct StepRunContext {
    pub step_run: StepRun,
    pub step: CampaignStep,
    pub template: MessageTemplate,
    pub campaign: Campaign,
    pub steps: Vec<CampaignStep>,
    pub recipient_run: RecipientRun,
    pub contact: Contact,
    pub instance: MessagingInstance,
}

impl Store {
    // ── Recipient runs ────────────────────────────────────────────────

    pub fn create_recipient_run(&self, campaign_id: Uuid, contact_id: Uuid) -> RecipientRun {
        let now = Utc::now();
        let run = RecipientRun {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id,
            status: RunStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            message_body: None,
            error_message: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.recipient_runs.insert(run.id, run.clone());
        run
    }

    pub fn recipient_run(&self, id: Uuid) -> Option<RecipientRun> {
        self.recipient_runs.get(&id).map(|r| r.clone())
    }

    pub fn recipient_runs_for_campaign(&self, campaign_id: Uuid) -> Vec<RecipientRun> {
        let mut runs: Vec<_> = self
            .recipient_runs
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        runs
    }

    pub fn set_recipient_run_status(
        &self,
        id: Uuid,
        to: RunStatus,
        outcome: RunOutcome,
    ) -> DispatchResult<()> {
        let mut run = self
            .recipient_runs
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("recipient run {id}")))?;

        if !run.status.can_transition(to) {
            return Err(DispatchError::InvalidTransition {
                entity: "recipient run",
                from: format!("{:?}", run.status),
                to: format!("{to:?}"),
            });
        }

        run.status = to;
        if let Some(message) = outcome.message {
            run.message_body = Some(message);
        }
        if let Some(error) = outcome.error {
            run.error_message = Some(error);
        }
        if to == RunStatus::Success {
            run.completed_at = Some(Utc::now());
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    pub fn increment_attempt(&self, id: Uuid) -> DispatchResult<()> {
        let mut run = self
            .recipient_runs
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("recipient run {id}")))?;
        run.attempt_count += 1;
        run.last_attempt_at = Some(Utc::now());
        run.updated_at = Utc::now();
        Ok(())
    }

    // ── Step runs ─────────────────────────────────────────────────────

    pub fn create_step_run(&self, recipient_run_id: Uuid, campaign_step_id: Uuid) -> StepRun {
        let run = StepRun {
            id: Uuid::new_v4(),
            recipient_run_id,
            campaign_step_id,
            status: RunStatus::Pending,
            scheduled_at: None,
            sent_at: None,
            completed_at: None,
            payload: None,
            error_message: None,
            created_at: Utc::now(),
        };
        self.step_runs.insert(run.id, run.clone());
        run
    }

    pub fn step_run(&self, id: Uuid) -> Option<StepRun> {
        self.step_runs.get(&id).map(|r| r.clone())
    }

    pub fn step_runs_for_recipient(&self, recipient_run_id: Uuid) -> Vec<StepRun> {
        let mut runs: Vec<_> = self
            .step_runs
            .iter()
            .filter(|r| r.recipient_run_id == recipient_run_id)
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        runs
    }

    pub fn set_step_run_status(
        &self,
        id: Uuid,
        to: RunStatus,
        outcome: RunOutcome,
    ) -> DispatchResult<()> {
        let mut run = self
            .step_runs
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("step run {id}")))?;

        if !run.status.can_transition(to) {
            return Err(DispatchError::InvalidTransition {
                entity: "step run",
                from: format!("{:?}", run.status),
                to: format!("{to:?}"),
            });
        }

        run.status = to;
        match to {
            RunStatus::Success => {
                let now = Utc::now();
                run.sent_at = Some(now);
                run.completed_at = Some(now);
                run.payload = outcome.payload;
                run.error_message = None;
            }
            RunStatus::Failed | RunStatus::Cancelled => {
                run.completed_at = Some(Utc::now());
                run.error_message = outcome.error;
            }
            RunStatus::Pending => {
                // Reset for retry; the schedule claim is re-stamped by the
                // caller, not released here.
                run.sent_at = None;
                run.completed_at = None;
                run.payload = None;
                run.error_message = None;
            }
            RunStatus::Processing => {}
        }
        Ok(())
    }

    /// Atomically claim a step run for scheduling: succeeds only when the
    /// run is still pending and unscheduled. Readers of `scheduled_at`
    /// and this write are serialized on the map's shard lock, so two
    /// racing passes get exactly one winner.
    pub fn claim_step_run(&self, id: Uuid, scheduled_at: DateTime<Utc>) -> bool {
        match self.step_runs.get_mut(&id) {
            Some(mut run)
                if run.status == RunStatus::Pending && run.scheduled_at.is_none() =>
            {
                run.scheduled_at = Some(scheduled_at);
                true
            }
            _ => false,
        }
    }

    /// Re-stamp the visibility time of an already-claimed step run
    /// (policy holds and retries).
    pub fn reschedule_step_run(&self, id: Uuid, scheduled_at: DateTime<Utc>) -> DispatchResult<()> {
        let mut run = self
            .step_runs
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("step run {id}")))?;
        run.scheduled_at = Some(scheduled_at);
        Ok(())
    }

    /// Create missing step runs for recipient runs added after the
    /// campaign's steps existed. Idempotent: recipients that already have
    /// step runs are left alone. Returns how many step runs were created.
    pub fn backfill_step_runs(&self, campaign_id: Uuid) -> usize {
        let steps = self.steps_for_campaign(campaign_id);
        if steps.is_empty() {
            return 0;
        }

        let mut created = 0;
        for recipient in self.recipient_runs_for_campaign(campaign_id) {
            if !self.step_runs_for_recipient(recipient.id).is_empty() {
                continue;
            }
            for step in &steps {
                self.create_step_run(recipient.id, step.id);
                created += 1;
            }
        }
        created
    }

    /// Step runs of a running campaign that are ready to be claimed:
    /// pending, unscheduled, recipient run still pending or processing.
    /// Sorted by (step order, step-run creation time) so early steps are
    /// never starved.
    pub fn schedule_candidates(&self, campaign_id: Uuid) -> Vec<ScheduleCandidate> {
        let mut candidates = Vec::new();

        for recipient in self.recipient_runs_for_campaign(campaign_id) {
            if !matches!(recipient.status, RunStatus::Pending | RunStatus::Processing) {
                continue;
            }
            for step_run in self.step_runs_for_recipient(recipient.id) {
                if step_run.status != RunStatus::Pending || step_run.scheduled_at.is_some() {
                    continue;
                }
                let Some(step) = self.campaign_step(step_run.campaign_step_id) else {
                    continue;
                };
                candidates.push(ScheduleCandidate {
                    step_run,
                    step,
                    recipient_run_id: recipient.id,
                    attempt_count: recipient.attempt_count,
                });
            }
        }

        candidates.sort_by(|a, b| {
            a.step
                .order
                .cmp(&b.step.order)
                .then(a.step_run.created_at.cmp(&b.step_run.created_at))
                .then(a.step_run.id.cmp(&b.step_run.id))
        });
        candidates
    }

    /// The pending, unscheduled step run of this recipient at exactly
    /// `order`, if any. Used for chaining after a step succeeds.
    pub fn next_pending_step(&self, recipient_run_id: Uuid, order: u32) -> Option<ScheduleCandidate> {
        let recipient = self.recipient_run(recipient_run_id)?;
        self.step_runs_for_recipient(recipient_run_id)
            .into_iter()
            .filter(|run| run.status == RunStatus::Pending && run.scheduled_at.is_none())
            .find_map(|step_run| {
                let step = self.campaign_step(step_run.campaign_step_id)?;
                (step.order == order).then_some(ScheduleCandidate {
                    step_run,
                    step,
                    recipient_run_id,
                    attempt_count: recipient.attempt_count,
                })
            })
    }

    /// Recipient-run counters for progress snapshots and completion
    /// checks.
    pub fn status_counts(&self, campaign_id: Uuid) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for run in self.recipient_runs.iter() {
            if run.campaign_id != campaign_id {
                continue;
            }
            counts.total += 1;
            match run.status {
                RunStatus::Pending => counts.pending += 1,
                RunStatus::Processing => counts.processing += 1,
                RunStatus::Success => counts.success += 1,
                RunStatus::Failed => counts.failed += 1,
                RunStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Load the full context for one job. `None` when any piece is
    /// missing; the worker treats that as non-retryable.
    pub fn step_run_context(&self, step_run_id: Uuid) -> Option<StepRunContext> {
        let step_run = self.step_run(step_run_id)?;
        let step = self.campaign_step(step_run.campaign_step_id)?;
        let template = self.template(step.template_id)?;
        let campaign = self.campaign(step.campaign_id)?;
        let steps = self.steps_for_campaign(campaign.id);
        let recipient_run = self.recipient_run(step_run.recipient_run_id)?;
        let contact = self.contact(recipient_run.contact_id)?;
        let instance = self.instance(campaign.instance_id)?;

        Some(StepRunContext {
            step_run,
            step,
            template,
            campaign,
            steps,
            recipient_run,
            contact,
            instance,
        })
    }
}
