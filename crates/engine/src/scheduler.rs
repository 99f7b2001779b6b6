//! Dispatch step scheduler: brings due step runs of a running campaign
//! into the queue without double-scheduling.

use chrono::Utc;
use dispatch_core::error::DispatchResult;
use dispatch_core::types::{CampaignStep, DispatchJob};
use dispatch_queue::DelayedJobQueue;
use dispatch_store::{ScheduleCandidate, Store};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default anti-burst stagger between candidates of one pass.
const DEFAULT_STAGGER_MS: u64 = 250;

pub struct StepScheduler {
    store: Arc<Store>,
    queue: Arc<DelayedJobQueue<DispatchJob>>,
    stagger_ms: u64,
}

impl StepScheduler {
    pub fn new(store: Arc<Store>, queue: Arc<DelayedJobQueue<DispatchJob>>) -> Self {
        Self {
            store,
            queue,
            stagger_ms: DEFAULT_STAGGER_MS,
        }
    }

    pub fn with_stagger_ms(mut self, stagger_ms: u64) -> Self {
        self.stagger_ms = stagger_ms;
        self
    }

    /// Per-step jitter: uniform inclusive seconds in the step's delay
    /// window, as milliseconds.
    fn step_delay_ms(step: &CampaignStep, rng: &mut impl Rng) -> u64 {
        let min = step.delay_min_seconds;
        let max = step.delay_max_seconds.max(min);
        if max == min {
            u64::from(min) * 1000
        } else {
            u64::from(rng.gen_range(min..=max)) * 1000
        }
    }

    /// Initial/resume pass: backfill missing step runs, then claim and
    /// enqueue every actionable step run — at most one per recipient per
    /// pass. Concurrent passes are safe: the claim is atomic, and a lost
    /// claim is skipped. Returns the number of jobs enqueued.
    pub fn schedule_initial_steps(&self, campaign_id: Uuid) -> DispatchResult<usize> {
        let steps = self.store.steps_for_campaign(campaign_id);
        if steps.is_empty() {
            return Ok(0);
        }

        let backfilled = self.store.backfill_step_runs(campaign_id);
        if backfilled > 0 {
            tracing::debug!(%campaign_id, backfilled, "backfilled missing step runs");
        }

        let candidates = self.store.schedule_candidates(campaign_id);
        let mut claimed_recipients: HashSet<Uuid> = HashSet::new();
        let mut enqueued = 0;
        let mut rng = rand::thread_rng();

        for (index, candidate) in candidates.iter().enumerate() {
            if !claimed_recipients.insert(candidate.recipient_run_id) {
                continue;
            }

            let delay_ms =
                Self::step_delay_ms(&candidate.step, &mut rng) + index as u64 * self.stagger_ms;
            if self.claim_and_enqueue(candidate, delay_ms) {
                enqueued += 1;
            }
        }

        tracing::info!(%campaign_id, enqueued, "scheduling pass finished");
        Ok(enqueued)
    }

    /// Chain the recipient's next step after `current_order` succeeded.
    /// Returns the enqueued job, or `None` when the sequence is
    /// exhausted (or another pass won the claim).
    pub fn schedule_next_step(
        &self,
        recipient_run_id: Uuid,
        current_order: u32,
    ) -> DispatchResult<Option<DispatchJob>> {
        let Some(candidate) = self
            .store
            .next_pending_step(recipient_run_id, current_order + 1)
        else {
            return Ok(None);
        };

        let mut rng = rand::thread_rng();
        let delay_ms = Self::step_delay_ms(&candidate.step, &mut rng);
        if self.claim_and_enqueue(&candidate, delay_ms) {
            Ok(Some(self.job_for(&candidate)))
        } else {
            Ok(None)
        }
    }

    /// Re-stamp a claimed step run's visibility time (policy holds and
    /// retries) and re-enqueue its job after `delay`.
    pub fn reschedule_step(
        &self,
        step_run_id: Uuid,
        job: &DispatchJob,
        delay: Duration,
    ) -> DispatchResult<()> {
        let scheduled_at = Utc::now()
            + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
        self.store.reschedule_step_run(step_run_id, scheduled_at)?;
        self.queue.enqueue(job.clone(), delay);
        Ok(())
    }

    fn claim_and_enqueue(&self, candidate: &ScheduleCandidate, delay_ms: u64) -> bool {
        let scheduled_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
        if !self.store.claim_step_run(candidate.step_run.id, scheduled_at) {
            tracing::debug!(
                step_run_id = %candidate.step_run.id,
                "step run already claimed, skipping"
            );
            return false;
        }

        let job = self.job_for(candidate);
        tracing::debug!(
            campaign_id = %job.campaign_id,
            recipient_run_id = %job.recipient_run_id,
            step_order = job.step_order,
            delay_ms,
            "enqueued dispatch job"
        );
        self.queue.enqueue(job, Duration::from_millis(delay_ms));
        true
    }

    fn job_for(&self, candidate: &ScheduleCandidate) -> DispatchJob {
        DispatchJob {
            campaign_id: candidate.step.campaign_id,
            recipient_run_id: candidate.recipient_run_id,
            campaign_step_id: candidate.step.id,
            step_run_id: candidate.step_run.id,
            step_order: candidate.step.order,
            attempt: candidate.attempt_count + 1,
        }
    }
}
