//! Anti-ban pacing policy — pure decision logic over a campaign's
//! pacing configuration and counters. No I/O, no hidden state; the
//! jitter RNG is passed in by the caller.

pub mod pacing;
pub mod windows;

pub use pacing::{
    can_send_now, compute_next_delay, effective_daily_count, next_allowed_date, validate_config,
};
pub use windows::{any_window_contains, window_contains};
