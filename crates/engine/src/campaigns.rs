//! Campaign lifecycle: creation with atomic recipient fan-out, start /
//! pause / resume, reporting, and the tick that launches scheduled
//! campaigns when their start time arrives.

use chrono::{DateTime, Utc};
use dispatch_core::error::{DispatchError, DispatchResult};
use dispatch_core::types::{
    AntiBanConfig, AntiBanState, Campaign, CampaignMode, CampaignStatus, CampaignStep, RunStatus,
};
use dispatch_policy::validate_config;
use dispatch_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::progress::ProgressNotifier;
use crate::scheduler::StepScheduler;

/// Recipients drawn for a test-mode campaign when no sample size is
/// given.
const DEFAULT_TEST_SAMPLE: u32 = 10;

#[derive(Debug, Clone)]
pub struct NewCampaignStep {
    pub template_id: Uuid,
    pub delay_min_seconds: u32,
    pub delay_max_seconds: u32,
    pub wait_for_reply_seconds: Option<u32>,
    pub cancel_if_reply: bool,
    pub skip_if_auto_reply: bool,
    pub typing_ms_override: Option<u64>,
    pub ai_variation: bool,
}

impl NewCampaignStep {
    pub fn new(template_id: Uuid) -> Self {
        Self {
            template_id,
            delay_min_seconds: 0,
            delay_max_seconds: 0,
            wait_for_reply_seconds: None,
            cancel_if_reply: false,
            skip_if_auto_reply: false,
            typing_ms_override: None,
            ai_variation: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub instance_id: Uuid,
    pub contact_ids: Vec<Uuid>,
    pub mode: CampaignMode,
    pub test_sample_size: Option<u32>,
    pub schedule_at: Option<DateTime<Utc>>,
    pub anti_ban: AntiBanConfig,
    pub steps: Vec<NewCampaignStep>,
}

/// One row of the per-recipient campaign report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientReport {
    pub contact_name: String,
    pub phone_number: String,
    pub status: RunStatus,
    pub message: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

pub struct CampaignService {
    store: Arc<Store>,
    scheduler: Arc<StepScheduler>,
    notifier: Arc<ProgressNotifier>,
}

impl CampaignService {
    pub fn new(
        store: Arc<Store>,
        scheduler: Arc<StepScheduler>,
        notifier: Arc<ProgressNotifier>,
    ) -> Self {
        Self {
            store,
            scheduler,
            notifier,
        }
    }

    /// Validate the configuration, then create the campaign with its
    /// steps and the full recipient-run × step-run fan-out.
    pub fn create(&self, user_id: Uuid, input: NewCampaign) -> DispatchResult<Campaign> {
        validate_config(&input.anti_ban)?;

        if input.steps.is_empty() {
            return Err(DispatchError::Validation(
                "campaign needs at least one step".into(),
            ));
        }
        if input.contact_ids.is_empty() {
            return Err(DispatchError::Validation("contact list is empty".into()));
        }

        let instance = self
            .store
            .instance(input.instance_id)
            .filter(|i| i.user_id == user_id)
            .ok_or_else(|| DispatchError::NotFound("messaging instance".into()))?;

        for step in &input.steps {
            self.store
                .template(step.template_id)
                .filter(|t| t.user_id == user_id)
                .ok_or_else(|| {
                    DispatchError::NotFound(format!("message template {}", step.template_id))
                })?;
        }

        let mut contacts = Vec::with_capacity(input.contact_ids.len());
        for contact_id in &input.contact_ids {
            let contact = self
                .store
                .contact(*contact_id)
                .ok_or_else(|| DispatchError::NotFound(format!("contact {contact_id}")))?;
            contacts.push(contact);
        }

        let sample_size = match input.mode {
            CampaignMode::Test => (input.test_sample_size.unwrap_or(DEFAULT_TEST_SAMPLE) as usize)
                .min(contacts.len()),
            CampaignMode::Live => contacts.len(),
        };
        contacts.truncate(sample_size);

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            user_id,
            name: input.name,
            status: if input.schedule_at.is_some() {
                CampaignStatus::Scheduled
            } else {
                CampaignStatus::Draft
            },
            mode: input.mode,
            test_sample_size: match input.mode {
                CampaignMode::Test => Some(sample_size as u32),
                CampaignMode::Live => None,
            },
            schedule_at: input.schedule_at,
            instance_id: instance.id,
            anti_ban: input.anti_ban,
            anti_ban_state: AntiBanState::default(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_campaign(campaign.clone());

        let mut step_ids = Vec::with_capacity(input.steps.len());
        for (index, step) in input.steps.into_iter().enumerate() {
            let delay_min = step.delay_min_seconds;
            let delay_max = step.delay_max_seconds.max(delay_min);
            let step_id = Uuid::new_v4();
            self.store.insert_campaign_step(CampaignStep {
                id: step_id,
                campaign_id: campaign.id,
                order: index as u32 + 1,
                template_id: step.template_id,
                delay_min_seconds: delay_min,
                delay_max_seconds: delay_max,
                wait_for_reply_seconds: step.wait_for_reply_seconds,
                cancel_if_reply: step.cancel_if_reply,
                skip_if_auto_reply: step.skip_if_auto_reply,
                typing_ms_override: step.typing_ms_override,
                ai_variation: step.ai_variation,
            });
            step_ids.push(step_id);
        }

        for contact in &contacts {
            let recipient = self.store.create_recipient_run(campaign.id, contact.id);
            for step_id in &step_ids {
                self.store.create_step_run(recipient.id, *step_id);
            }
        }

        tracing::info!(
            campaign_id = %campaign.id,
            recipients = contacts.len(),
            steps = step_ids.len(),
            "campaign created"
        );
        self.notifier.emit_progress(campaign.id);
        Ok(campaign)
    }

    /// Flip the campaign to running and trigger a scheduling pass.
    /// Starting an already-running campaign is a no-op.
    pub fn start(&self, user_id: Uuid, campaign_id: Uuid) -> DispatchResult<Campaign> {
        let campaign = self.owned_campaign(user_id, campaign_id)?;
        if campaign.status == CampaignStatus::Running {
            return Ok(campaign);
        }

        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Running)?;
        self.scheduler.schedule_initial_steps(campaign_id)?;
        self.notifier.emit_progress(campaign_id);

        tracing::info!(%campaign_id, "campaign started");
        self.owned_campaign(user_id, campaign_id)
    }

    /// Pause a running campaign. Queued and in-flight jobs are not
    /// cancelled; the worker re-defers them until resume.
    pub fn pause(&self, user_id: Uuid, campaign_id: Uuid) -> DispatchResult<()> {
        let campaign = self.owned_campaign(user_id, campaign_id)?;
        if campaign.status != CampaignStatus::Running {
            return Err(DispatchError::Validation("campaign is not running".into()));
        }

        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Paused)?;
        self.notifier.emit_progress(campaign_id);
        tracing::info!(%campaign_id, "campaign paused");
        Ok(())
    }

    /// Resume a paused campaign and re-trigger the scheduler.
    pub fn resume(&self, user_id: Uuid, campaign_id: Uuid) -> DispatchResult<()> {
        let campaign = self.owned_campaign(user_id, campaign_id)?;
        if campaign.status != CampaignStatus::Paused {
            return Err(DispatchError::Validation("campaign is not paused".into()));
        }

        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Running)?;
        self.scheduler.schedule_initial_steps(campaign_id)?;
        self.notifier.emit_progress(campaign_id);
        tracing::info!(%campaign_id, "campaign resumed");
        Ok(())
    }

    /// Per-recipient rows for campaign exports and detail views.
    pub fn report(&self, user_id: Uuid, campaign_id: Uuid) -> DispatchResult<Vec<RecipientReport>> {
        self.owned_campaign(user_id, campaign_id)?;

        let rows = self
            .store
            .recipient_runs_for_campaign(campaign_id)
            .into_iter()
            .map(|run| {
                let contact = self.store.contact(run.contact_id);
                RecipientReport {
                    contact_name: contact
                        .as_ref()
                        .map(|c| c.name.clone())
                        .unwrap_or_default(),
                    phone_number: contact
                        .map(|c| c.phone_number)
                        .unwrap_or_default(),
                    status: run.status,
                    message: run.message_body,
                    error: run.error_message,
                    attempts: run.attempt_count,
                    last_attempt_at: run.last_attempt_at,
                }
            })
            .collect();
        Ok(rows)
    }

    /// Republish the current counters on demand.
    pub fn progress(&self, user_id: Uuid, campaign_id: Uuid) -> DispatchResult<()> {
        self.owned_campaign(user_id, campaign_id)?;
        self.notifier.emit_progress(campaign_id);
        Ok(())
    }

    /// Start every scheduled campaign whose start time has passed. One
    /// campaign failing to start never aborts the tick. Returns how many
    /// campaigns were started.
    pub fn run_scheduled_tick(&self) -> usize {
        let mut started = 0;
        for campaign in self.store.due_scheduled_campaigns(Utc::now()) {
            match self.start(campaign.user_id, campaign.id) {
                Ok(_) => {
                    tracing::info!(campaign_id = %campaign.id, "scheduled campaign started");
                    started += 1;
                }
                Err(error) => {
                    tracing::error!(
                        campaign_id = %campaign.id,
                        %error,
                        "failed to start scheduled campaign"
                    );
                }
            }
        }
        started
    }

    fn owned_campaign(&self, user_id: Uuid, campaign_id: Uuid) -> DispatchResult<Campaign> {
        self.store
            .campaign(campaign_id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| DispatchError::NotFound(format!("campaign {campaign_id}")))
    }
}

/// Periodic driver for [`CampaignService::run_scheduled_tick`].
pub fn spawn_scheduled_tick(
    service: Arc<CampaignService>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            service.run_scheduled_tick();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::event_bus::{capture_sink, CaptureSink, CAMPAIGN_PROGRESS};
    use dispatch_core::types::{Contact, DispatchJob, MessageTemplate, MessagingInstance};
    use dispatch_queue::DelayedJobQueue;
    use std::collections::HashMap;

    struct Fixture {
        store: Arc<Store>,
        queue: Arc<DelayedJobQueue<DispatchJob>>,
        service: CampaignService,
        sink: Arc<CaptureSink>,
        user_id: Uuid,
        instance_id: Uuid,
        template_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::new());
        let queue = Arc::new(DelayedJobQueue::new());
        let scheduler = Arc::new(
            StepScheduler::new(Arc::clone(&store), Arc::clone(&queue)).with_stagger_ms(0),
        );
        let sink = capture_sink();
        let notifier = Arc::new(ProgressNotifier::new(Arc::clone(&store), sink.clone()));
        let service = CampaignService::new(Arc::clone(&store), scheduler, notifier);

        let user_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        store.insert_instance(MessagingInstance {
            id: instance_id,
            user_id,
            name: "primary".into(),
            base_url: "https://gateway.local".into(),
            api_key: "key".into(),
        });
        let template_id = Uuid::new_v4();
        store.insert_template(MessageTemplate {
            id: template_id,
            user_id,
            name: "welcome".into(),
            content: "Hi {name}".into(),
        });

        Fixture {
            store,
            queue,
            service,
            sink,
            user_id,
            instance_id,
            template_id,
        }
    }

    fn contacts(f: &Fixture, count: usize) -> Vec<Uuid> {
        (0..count)
            .map(|n| {
                let id = Uuid::new_v4();
                f.store.insert_contact(Contact {
                    id,
                    name: format!("Contact {n}"),
                    phone_number: format!("+55119999900{n:02}"),
                    custom_fields: HashMap::new(),
                });
                id
            })
            .collect()
    }

    fn valid_anti_ban() -> AntiBanConfig {
        AntiBanConfig {
            min_interval_seconds: 15,
            max_interval_seconds: 45,
            long_pause_every: 20,
            long_pause_min_seconds: 120,
            long_pause_max_seconds: 300,
            daily_limit: 200,
            allowed_windows: vec![],
        }
    }

    fn new_campaign(f: &Fixture, contact_ids: Vec<Uuid>) -> NewCampaign {
        NewCampaign {
            name: "spring launch".into(),
            instance_id: f.instance_id,
            contact_ids,
            mode: CampaignMode::Live,
            test_sample_size: None,
            schedule_at: None,
            anti_ban: valid_anti_ban(),
            steps: vec![NewCampaignStep::new(f.template_id)],
        }
    }

    #[test]
    fn create_fans_out_runs_and_steps() {
        let f = fixture();
        let ids = contacts(&f, 3);
        let mut input = new_campaign(&f, ids);
        input.steps.push(NewCampaignStep {
            delay_min_seconds: 30,
            delay_max_seconds: 10, // inverted on purpose
            ..NewCampaignStep::new(f.template_id)
        });

        let campaign = f.service.create(f.user_id, input).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        let runs = f.store.recipient_runs_for_campaign(campaign.id);
        assert_eq!(runs.len(), 3);
        for run in &runs {
            assert_eq!(f.store.step_runs_for_recipient(run.id).len(), 2);
        }

        // Steps get 1-based orders and normalized delay bounds.
        let steps = f.store.steps_for_campaign(campaign.id);
        assert_eq!(steps[0].order, 1);
        assert_eq!(steps[1].order, 2);
        assert_eq!(steps[1].delay_min_seconds, 30);
        assert_eq!(steps[1].delay_max_seconds, 30);

        assert_eq!(f.sink.count_event(CAMPAIGN_PROGRESS), 1);
        // Nothing is queued until the campaign starts.
        assert!(f.queue.is_empty());
    }

    #[test]
    fn create_validates_input() {
        let f = fixture();

        // No contacts.
        let err = f.service.create(f.user_id, new_campaign(&f, vec![])).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        // No steps.
        let ids = contacts(&f, 1);
        let mut input = new_campaign(&f, ids.clone());
        input.steps.clear();
        let err = f.service.create(f.user_id, input).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        // Broken pacing config.
        let mut input = new_campaign(&f, ids.clone());
        input.anti_ban.daily_limit = 0;
        let err = f.service.create(f.user_id, input).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));

        // Unknown instance.
        let mut input = new_campaign(&f, ids.clone());
        input.instance_id = Uuid::new_v4();
        let err = f.service.create(f.user_id, input).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        // Another user's instance is invisible.
        let err = f
            .service
            .create(Uuid::new_v4(), new_campaign(&f, ids.clone()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        // Unknown template.
        let mut input = new_campaign(&f, ids);
        input.steps = vec![NewCampaignStep::new(Uuid::new_v4())];
        let err = f.service.create(f.user_id, input).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[test]
    fn test_mode_samples_the_contact_list() {
        let f = fixture();
        let ids = contacts(&f, 5);
        let mut input = new_campaign(&f, ids);
        input.mode = CampaignMode::Test;
        input.test_sample_size = Some(2);

        let campaign = f.service.create(f.user_id, input).unwrap();
        assert_eq!(campaign.test_sample_size, Some(2));
        assert_eq!(f.store.recipient_runs_for_campaign(campaign.id).len(), 2);
    }

    #[test]
    fn start_schedules_and_is_idempotent() {
        let f = fixture();
        let ids = contacts(&f, 2);
        let campaign = f.service.create(f.user_id, new_campaign(&f, ids)).unwrap();

        let started = f.service.start(f.user_id, campaign.id).unwrap();
        assert_eq!(started.status, CampaignStatus::Running);
        assert_eq!(f.queue.len(), 2);

        // Starting again neither fails nor double-schedules.
        let again = f.service.start(f.user_id, campaign.id).unwrap();
        assert_eq!(again.status, CampaignStatus::Running);
        assert_eq!(f.queue.len(), 2);
    }

    #[test]
    fn pause_and_resume_enforce_state() {
        let f = fixture();
        let ids = contacts(&f, 1);
        let campaign = f.service.create(f.user_id, new_campaign(&f, ids)).unwrap();

        // Pausing a draft is rejected.
        assert!(f.service.pause(f.user_id, campaign.id).is_err());

        f.service.start(f.user_id, campaign.id).unwrap();
        f.service.pause(f.user_id, campaign.id).unwrap();
        assert_eq!(
            f.store.campaign(campaign.id).unwrap().status,
            CampaignStatus::Paused
        );

        // Resuming twice is rejected the second time.
        f.service.resume(f.user_id, campaign.id).unwrap();
        assert!(f.service.resume(f.user_id, campaign.id).is_err());

        // The queued job survived the pause; resume did not duplicate it.
        assert_eq!(f.queue.len(), 1);
    }

    #[test]
    fn scheduled_tick_starts_due_campaigns_only() {
        let f = fixture();
        let ids = contacts(&f, 1);

        let mut due = new_campaign(&f, ids.clone());
        due.schedule_at = Some(Utc::now() - chrono::Duration::minutes(1));
        let due = f.service.create(f.user_id, due).unwrap();
        assert_eq!(due.status, CampaignStatus::Scheduled);

        let mut later = new_campaign(&f, ids);
        later.schedule_at = Some(Utc::now() + chrono::Duration::hours(2));
        let later = f.service.create(f.user_id, later).unwrap();

        assert_eq!(f.service.run_scheduled_tick(), 1);
        assert_eq!(
            f.store.campaign(due.id).unwrap().status,
            CampaignStatus::Running
        );
        assert_eq!(
            f.store.campaign(later.id).unwrap().status,
            CampaignStatus::Scheduled
        );

        // Nothing left due on the next tick.
        assert_eq!(f.service.run_scheduled_tick(), 0);
    }

    #[test]
    fn report_lists_every_recipient() {
        let f = fixture();
        let ids = contacts(&f, 2);
        let campaign = f.service.create(f.user_id, new_campaign(&f, ids)).unwrap();

        let rows = f.service.report(f.user_id, campaign.id).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == RunStatus::Pending));
        assert!(rows[0].contact_name.starts_with("Contact"));

        // Foreign users see nothing.
        assert!(f.service.report(Uuid::new_v4(), campaign.id).is_err());
    }

    #[test]
    fn progress_republishes_on_demand() {
        let f = fixture();
        let ids = contacts(&f, 1);
        let campaign = f.service.create(f.user_id, new_campaign(&f, ids)).unwrap();
        let before = f.sink.count_event(CAMPAIGN_PROGRESS);

        f.service.progress(f.user_id, campaign.id).unwrap();
        assert_eq!(f.sink.count_event(CAMPAIGN_PROGRESS), before + 1);

        assert!(f.service.progress(Uuid::new_v4(), campaign.id).is_err());
    }
}
