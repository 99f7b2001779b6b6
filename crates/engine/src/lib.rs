//! Campaign dispatch engine: turns pending per-recipient steps into
//! queued jobs, processes them one at a time under the anti-ban policy,
//! and keeps campaign progress observable in realtime.

pub mod campaigns;
pub mod progress;
pub mod scheduler;
pub mod worker;

pub use campaigns::{
    spawn_scheduled_tick, CampaignService, NewCampaign, NewCampaignStep, RecipientReport,
};
pub use progress::ProgressNotifier;
pub use scheduler::StepScheduler;
pub use worker::DispatchWorker;
