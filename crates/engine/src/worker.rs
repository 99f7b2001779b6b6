//! Dispatch worker: pulls one job at a time, validates preconditions
//! against the anti-ban policy and the blacklist, performs the send, and
//! chains or finalizes the recipient run.
//!
//! Policy holds (daily cap, pacing gate, time window, paused campaign)
//! are not errors: the job is silently re-deferred and the attempt count
//! untouched. Only transient send failures consume attempts.

use chrono::{DateTime, NaiveTime, Utc};
use dispatch_channels::{typing_delay_ms, GatewayFactory, SendMessage};
use dispatch_core::error::DispatchResult;
use dispatch_core::types::{AntiBanState, CampaignStatus, DispatchJob, RunStatus};
use dispatch_personalization::MessagePersonalizer;
use dispatch_policy as policy;
use dispatch_queue::DelayedJobQueue;
use dispatch_store::{RunOutcome, Store, StepRunContext};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::progress::ProgressNotifier;
use crate::scheduler::StepScheduler;

/// Send attempts per step run before the recipient run is permanently
/// failed.
const MAX_ATTEMPTS: u32 = 3;

/// Re-check cadence for jobs popped while their campaign is not running.
const PAUSED_CAMPAIGN_REQUEUE: Duration = Duration::from_secs(5 * 60);

/// Floor for the daily-cap hold.
const DAILY_CAP_FLOOR: Duration = Duration::from_secs(60 * 60);

/// Floor for the `next_available_at` pacing hold.
const PACING_GATE_FLOOR: Duration = Duration::from_secs(5);

/// Floor for the time-of-day window hold.
const WINDOW_FLOOR: Duration = Duration::from_secs(10);

pub struct DispatchWorker {
    store: Arc<Store>,
    queue: Arc<DelayedJobQueue<DispatchJob>>,
    scheduler: Arc<StepScheduler>,
    notifier: Arc<ProgressNotifier>,
    gateways: Arc<dyn GatewayFactory>,
    personalizer: Arc<MessagePersonalizer>,
}

impl DispatchWorker {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<DelayedJobQueue<DispatchJob>>,
        scheduler: Arc<StepScheduler>,
        notifier: Arc<ProgressNotifier>,
        gateways: Arc<dyn GatewayFactory>,
        personalizer: Arc<MessagePersonalizer>,
    ) -> Self {
        Self {
            store,
            queue,
            scheduler,
            notifier,
            gateways,
            personalizer,
        }
    }

    /// Consume the queue one job at a time. At concurrency 1 the
    /// per-campaign pacing state needs no extra locking.
    pub async fn run(&self) {
        tracing::info!("dispatch worker started");
        loop {
            let job = self.queue.recv().await;
            self.process_job(&job).await;
        }
    }

    /// Process one job. Never panics and never lets an error escape:
    /// unexpected faults are logged and the job dropped.
    pub async fn process_job(&self, job: &DispatchJob) {
        if let Err(error) = self.try_process_job(job).await {
            tracing::error!(
                step_run_id = %job.step_run_id,
                %error,
                "job processing failed unexpectedly"
            );
        }
    }

    async fn try_process_job(&self, job: &DispatchJob) -> DispatchResult<()> {
        let Some(ctx) = self.store.step_run_context(job.step_run_id) else {
            tracing::warn!(step_run_id = %job.step_run_id, "dispatch context not found, dropping job");
            return Ok(());
        };

        // Stale or duplicate job for an already-finalized recipient.
        if matches!(
            ctx.recipient_run.status,
            RunStatus::Failed | RunStatus::Cancelled
        ) {
            tracing::info!(
                recipient_run_id = %ctx.recipient_run.id,
                status = ?ctx.recipient_run.status,
                "recipient run already finalized, dropping job"
            );
            return Ok(());
        }

        if ctx.campaign.status != CampaignStatus::Running {
            tracing::info!(
                campaign_id = %ctx.campaign.id,
                status = ?ctx.campaign.status,
                "campaign not runnable, requeueing"
            );
            return self
                .scheduler
                .reschedule_step(job.step_run_id, job, PAUSED_CAMPAIGN_REQUEUE);
        }

        let config = &ctx.campaign.anti_ban;
        let state = &ctx.campaign.anti_ban_state;
        let now = Utc::now();
        let daily_count_today = policy::effective_daily_count(state, now);

        if daily_count_today >= config.daily_limit {
            let next_midnight = (now + chrono::Duration::days(1))
                .date_naive()
                .and_time(NaiveTime::MIN)
                .and_utc();
            let next_window = policy::next_allowed_date(config, next_midnight);
            let delay = gap_with_floor(next_window, now, DAILY_CAP_FLOOR);
            tracing::info!(
                campaign_id = %ctx.campaign.id,
                daily_count = daily_count_today,
                "daily limit reached, deferring to next allowed window"
            );
            return self.scheduler.reschedule_step(job.step_run_id, job, delay);
        }

        if let Some(next_available_at) = state.next_available_at {
            if next_available_at > now {
                let delay = gap_with_floor(next_available_at, now, PACING_GATE_FLOOR);
                tracing::debug!(
                    campaign_id = %ctx.campaign.id,
                    %next_available_at,
                    "pacing gate in the future, deferring"
                );
                return self.scheduler.reschedule_step(job.step_run_id, job, delay);
            }
        }

        let normalized = AntiBanState {
            daily_count: daily_count_today,
            ..state.clone()
        };
        if !policy::can_send_now(config, now, &normalized) {
            let next_window = policy::next_allowed_date(config, now);
            let delay = gap_with_floor(next_window, now, WINDOW_FLOOR);
            tracing::info!(
                campaign_id = %ctx.campaign.id,
                "outside allowed window, deferring"
            );
            return self.scheduler.reschedule_step(job.step_run_id, job, delay);
        }

        if self
            .store
            .is_blacklisted(ctx.campaign.user_id, &ctx.contact.phone_number)
        {
            return self.cancel_blacklisted(job, &ctx);
        }

        if ctx.recipient_run.status == RunStatus::Pending {
            self.store.set_recipient_run_status(
                ctx.recipient_run.id,
                RunStatus::Processing,
                RunOutcome::default(),
            )?;
        }
        self.store.increment_attempt(ctx.recipient_run.id)?;
        self.store
            .set_step_run_status(job.step_run_id, RunStatus::Processing, RunOutcome::default())?;
        self.store.add_dispatch_log(
            ctx.recipient_run.id,
            RunStatus::Processing,
            Some(&format!("sending step {}", ctx.step.order)),
        );
        self.notifier.emit_dispatch_event(ctx.recipient_run.id);

        let message = self
            .personalizer
            .generate(&ctx.template.content, &ctx.contact, None, ctx.step.ai_variation)
            .await;

        let payload = SendMessage {
            to: ctx.contact.phone_number.clone(),
            message: message.clone(),
            simulate_typing_ms: typing_delay_ms(&message, ctx.step.typing_ms_override),
        };

        let gateway = self.gateways.gateway_for(&ctx.instance);
        match gateway.send_message(&payload).await {
            Ok(()) => self.finish_success(job, &ctx, message, daily_count_today),
            Err(error) => self.finish_failure(job, &ctx, error.to_string()),
        }
    }

    fn finish_success(
        &self,
        job: &DispatchJob,
        ctx: &StepRunContext,
        message: String,
        daily_count_today: u32,
    ) -> DispatchResult<()> {
        self.store.set_step_run_status(
            job.step_run_id,
            RunStatus::Success,
            RunOutcome::payload(serde_json::json!({ "message": message })),
        )?;

        // Counters first, then the jitter over the post-increment state.
        let now_sent = Utc::now();
        let mut updated = AntiBanState {
            version: ctx.campaign.anti_ban_state.version,
            messages_sent: ctx.campaign.anti_ban_state.messages_sent + 1,
            daily_count: daily_count_today + 1,
            last_sent_at: Some(now_sent),
            last_long_pause_at: ctx.campaign.anti_ban_state.last_long_pause_at,
            next_available_at: None,
        };
        let delay =
            policy::compute_next_delay(&ctx.campaign.anti_ban, &updated, &mut rand::thread_rng());
        let next_available_at = now_sent + chrono::Duration::milliseconds(delay.total_ms as i64);
        updated.next_available_at = Some(next_available_at);
        if delay.long_pause_ms > 0 {
            updated.last_long_pause_at = Some(next_available_at);
        }
        self.store
            .update_anti_ban_state(ctx.campaign.id, updated)?;

        let total_steps = ctx.steps.len() as u32;
        if job.step_order >= total_steps {
            self.store.set_recipient_run_status(
                ctx.recipient_run.id,
                RunStatus::Success,
                RunOutcome::message(message),
            )?;
            self.store.add_dispatch_log(
                ctx.recipient_run.id,
                RunStatus::Success,
                Some("sequence finished"),
            );
            self.maybe_complete_campaign(ctx.campaign.id)?;
        } else {
            self.scheduler
                .schedule_next_step(ctx.recipient_run.id, job.step_order)?;
            self.store.add_dispatch_log(
                ctx.recipient_run.id,
                RunStatus::Processing,
                Some(&format!("step {} finished", ctx.step.order)),
            );
        }

        self.notifier.emit_dispatch_event(ctx.recipient_run.id);
        self.notifier.emit_progress(ctx.campaign.id);
        Ok(())
    }

    fn finish_failure(
        &self,
        job: &DispatchJob,
        ctx: &StepRunContext,
        error: String,
    ) -> DispatchResult<()> {
        tracing::warn!(
            step_run_id = %job.step_run_id,
            attempt = job.attempt,
            %error,
            "send failed"
        );
        self.store.set_step_run_status(
            job.step_run_id,
            RunStatus::Failed,
            RunOutcome::error(error.clone()),
        )?;
        self.store
            .add_dispatch_log(ctx.recipient_run.id, RunStatus::Failed, Some(&error));

        if job.attempt < MAX_ATTEMPTS {
            let retry_delay = Duration::from_secs(2u64.pow(job.attempt));
            self.store.set_recipient_run_status(
                ctx.recipient_run.id,
                RunStatus::Pending,
                RunOutcome::default(),
            )?;
            let retry = DispatchJob {
                attempt: job.attempt + 1,
                ..job.clone()
            };
            self.scheduler
                .reschedule_step(job.step_run_id, &retry, retry_delay)?;
            self.store.set_step_run_status(
                job.step_run_id,
                RunStatus::Pending,
                RunOutcome::default(),
            )?;
        } else {
            self.store.set_recipient_run_status(
                ctx.recipient_run.id,
                RunStatus::Failed,
                RunOutcome::error(error),
            )?;
            self.maybe_fail_campaign(ctx.campaign.id)?;
        }

        self.notifier.emit_dispatch_event(ctx.recipient_run.id);
        self.notifier.emit_progress(ctx.campaign.id);
        Ok(())
    }

    /// Terminal business rule: cancel the step run and the whole
    /// recipient run, no send attempted, not retried.
    fn cancel_blacklisted(&self, job: &DispatchJob, ctx: &StepRunContext) -> DispatchResult<()> {
        const REASON: &str = "number is blacklisted";
        tracing::info!(
            recipient_run_id = %ctx.recipient_run.id,
            "contact is blacklisted, cancelling run"
        );

        self.store.set_step_run_status(
            job.step_run_id,
            RunStatus::Cancelled,
            RunOutcome::error(REASON),
        )?;
        self.store.set_recipient_run_status(
            ctx.recipient_run.id,
            RunStatus::Cancelled,
            RunOutcome::error(REASON),
        )?;
        self.store
            .add_dispatch_log(ctx.recipient_run.id, RunStatus::Cancelled, Some(REASON));

        self.maybe_complete_campaign(ctx.campaign.id)?;
        self.notifier.emit_dispatch_event(ctx.recipient_run.id);
        self.notifier.emit_progress(ctx.campaign.id);
        Ok(())
    }

    /// Completed iff every recipient run is terminal and none failed.
    fn maybe_complete_campaign(&self, campaign_id: Uuid) -> DispatchResult<()> {
        let counts = self.store.status_counts(campaign_id);
        if !counts.is_complete() {
            return Ok(());
        }
        if let Some(campaign) = self.store.campaign(campaign_id) {
            if campaign.status == CampaignStatus::Running {
                self.store
                    .set_campaign_status(campaign_id, CampaignStatus::Completed)?;
                tracing::info!(%campaign_id, "campaign completed");
            }
        }
        Ok(())
    }

    /// Failed as soon as one recipient run is permanently failed, even
    /// with others still in flight.
    fn maybe_fail_campaign(&self, campaign_id: Uuid) -> DispatchResult<()> {
        let counts = self.store.status_counts(campaign_id);
        if !counts.has_failures() {
            return Ok(());
        }
        if let Some(campaign) = self.store.campaign(campaign_id) {
            if campaign.status == CampaignStatus::Running {
                self.store
                    .set_campaign_status(campaign_id, CampaignStatus::Failed)?;
                tracing::warn!(%campaign_id, "campaign failed");
            }
        }
        Ok(())
    }
}

fn gap_with_floor(until: DateTime<Utc>, now: DateTime<Utc>, floor: Duration) -> Duration {
    let gap_ms = (until - now).num_milliseconds().max(0) as u64;
    Duration::from_millis(gap_ms).max(floor)
}
