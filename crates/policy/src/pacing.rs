//! Next-delay computation, eligibility checks, and next-allowed-time
//! search over the anti-ban configuration and pacing counters.

use chrono::{DateTime, Timelike, Utc};
use dispatch_core::error::{DispatchError, DispatchResult};
use dispatch_core::types::{AntiBanConfig, AntiBanDelay, AntiBanState};
use rand::Rng;

use crate::windows::{any_window_contains, start_minutes};

/// Uniform inclusive jitter in seconds, returned as milliseconds.
/// An inverted bound collapses to the minimum.
fn jitter_ms(rng: &mut impl Rng, min_seconds: u32, max_seconds: u32) -> u64 {
    let max = max_seconds.max(min_seconds);
    u64::from(rng.gen_range(min_seconds..=max)) * 1000
}

/// Compute the pause to insert after the send that brings the counters to
/// `state`. The long-pause component applies only when `messages_sent` is
/// a positive multiple of `long_pause_every`.
pub fn compute_next_delay(
    config: &AntiBanConfig,
    state: &AntiBanState,
    rng: &mut impl Rng,
) -> AntiBanDelay {
    let base_ms = jitter_ms(rng, config.min_interval_seconds, config.max_interval_seconds);

    let long_pause_due = config.long_pause_every > 0
        && state.messages_sent > 0
        && state.messages_sent % u64::from(config.long_pause_every) == 0;

    let long_pause_ms = if long_pause_due {
        jitter_ms(
            rng,
            config.long_pause_min_seconds,
            config.long_pause_max_seconds,
        )
    } else {
        0
    };

    AntiBanDelay {
        base_ms,
        long_pause_ms,
        total_ms: base_ms + long_pause_ms,
    }
}

/// The daily counter with the calendar-day rollover applied: when the
/// last send happened on a previous UTC day (or never), the effective
/// count is 0 until the next successful send.
pub fn effective_daily_count(state: &AntiBanState, now: DateTime<Utc>) -> u32 {
    match state.last_sent_at {
        Some(last) if last.date_naive() == now.date_naive() => state.daily_count,
        _ => 0,
    }
}

/// Whether a send is permitted at `now` given the daily counter and the
/// configured time-of-day windows. The caller is responsible for rolling
/// `daily_count` over when the calendar day of `last_sent_at` has passed.
pub fn can_send_now(config: &AntiBanConfig, now: DateTime<Utc>, state: &AntiBanState) -> bool {
    if state.daily_count >= config.daily_limit {
        return false;
    }

    if config.allowed_windows.is_empty() {
        return true;
    }

    any_window_contains(&config.allowed_windows, now.time())
}

/// Earliest instant at or after `from` that satisfies the window check:
/// `from` itself when no windows are configured or `from` is already
/// inside one, else the start of the next window today, else the start of
/// the earliest window tomorrow. Idempotent.
pub fn next_allowed_date(config: &AntiBanConfig, from: DateTime<Utc>) -> DateTime<Utc> {
    if config.allowed_windows.is_empty() {
        return from;
    }

    if any_window_contains(&config.allowed_windows, from.time()) {
        return from;
    }

    let minutes_now = from.time().hour() * 60 + from.time().minute();

    let mut sorted: Vec<_> = config.allowed_windows.iter().collect();
    sorted.sort_by_key(|w| start_minutes(w));

    for window in &sorted {
        if start_minutes(window) > minutes_now {
            return at_window_start(from, window.start);
        }
    }

    let first = sorted[0];
    at_window_start(from + chrono::Duration::days(1), first.start)
}

fn at_window_start(day: DateTime<Utc>, start: chrono::NaiveTime) -> DateTime<Utc> {
    day.date_naive()
        .and_time(start)
        .and_utc()
}

/// Fail-fast validation of a pacing configuration.
pub fn validate_config(config: &AntiBanConfig) -> DispatchResult<()> {
    if config.min_interval_seconds < 1 {
        return Err(DispatchError::Config(
            "min_interval_seconds must be at least 1".into(),
        ));
    }
    if config.max_interval_seconds < config.min_interval_seconds {
        return Err(DispatchError::Config(
            "max_interval_seconds must not be below min_interval_seconds".into(),
        ));
    }
    if config.long_pause_every < 1 {
        return Err(DispatchError::Config(
            "long_pause_every must be at least 1".into(),
        ));
    }
    if config.long_pause_min_seconds < 1 {
        return Err(DispatchError::Config(
            "long_pause_min_seconds must be at least 1".into(),
        ));
    }
    if config.long_pause_max_seconds < config.long_pause_min_seconds {
        return Err(DispatchError::Config(
            "long_pause_max_seconds must not be below long_pause_min_seconds".into(),
        ));
    }
    if config.daily_limit < 1 {
        return Err(DispatchError::Config("daily_limit must be at least 1".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use dispatch_core::types::TimeWindow;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed_config() -> AntiBanConfig {
        AntiBanConfig {
            min_interval_seconds: 15,
            max_interval_seconds: 15,
            long_pause_every: 2,
            long_pause_min_seconds: 100,
            long_pause_max_seconds: 100,
            daily_limit: 10,
            allowed_windows: vec![],
        }
    }

    fn state_with(messages_sent: u64, daily_count: u32) -> AntiBanState {
        AntiBanState {
            messages_sent,
            daily_count,
            ..AntiBanState::default()
        }
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow::new(
            NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, h, m, 0).unwrap()
    }

    #[test]
    fn base_delay_without_long_pause() {
        // One message sent so far: 1 is not a multiple of 2.
        let mut rng = StdRng::seed_from_u64(7);
        let delay = compute_next_delay(&fixed_config(), &state_with(1, 1), &mut rng);
        assert_eq!(delay.base_ms, 15_000);
        assert_eq!(delay.long_pause_ms, 0);
        assert_eq!(delay.total_ms, 15_000);
    }

    #[test]
    fn long_pause_on_multiple_of_every() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = compute_next_delay(&fixed_config(), &state_with(2, 2), &mut rng);
        assert_eq!(delay.base_ms, 15_000);
        assert_eq!(delay.long_pause_ms, 100_000);
        assert_eq!(delay.total_ms, 115_000);
    }

    #[test]
    fn long_pause_component_stays_within_bounds() {
        let config = AntiBanConfig {
            min_interval_seconds: 1,
            max_interval_seconds: 5,
            long_pause_every: 3,
            long_pause_min_seconds: 60,
            long_pause_max_seconds: 120,
            daily_limit: 100,
            allowed_windows: vec![],
        };
        let mut rng = StdRng::seed_from_u64(42);

        for k in 1..=20u64 {
            let sent = k * 3;
            let delay = compute_next_delay(&config, &state_with(sent, 0), &mut rng);
            assert!(delay.long_pause_ms >= 60_000 && delay.long_pause_ms <= 120_000);

            let delay = compute_next_delay(&config, &state_with(sent + 1, 0), &mut rng);
            assert_eq!(delay.long_pause_ms, 0);
        }
    }

    #[test]
    fn zero_messages_sent_never_long_pauses() {
        let mut rng = StdRng::seed_from_u64(1);
        let delay = compute_next_delay(&fixed_config(), &state_with(0, 0), &mut rng);
        assert_eq!(delay.long_pause_ms, 0);
    }

    #[test]
    fn daily_limit_blocks_regardless_of_windows() {
        let mut config = fixed_config();
        config.daily_limit = 5;
        config.allowed_windows = vec![window((0, 0), (23, 59))];

        assert!(!can_send_now(&config, at(12, 0), &state_with(10, 5)));
        assert!(!can_send_now(&config, at(3, 0), &state_with(10, 6)));
        assert!(can_send_now(&config, at(12, 0), &state_with(10, 4)));
    }

    #[test]
    fn no_windows_means_any_time_of_day() {
        let config = fixed_config();
        assert!(can_send_now(&config, at(3, 30), &state_with(0, 0)));
    }

    #[test]
    fn window_miss_blocks_send() {
        let mut config = fixed_config();
        config.allowed_windows = vec![window((9, 0), (18, 0))];
        assert!(!can_send_now(&config, at(20, 0), &state_with(0, 0)));
        assert!(can_send_now(&config, at(10, 0), &state_with(0, 0)));
    }

    #[test]
    fn next_allowed_passes_through_without_windows() {
        let config = fixed_config();
        let from = at(20, 17);
        assert_eq!(next_allowed_date(&config, from), from);
    }

    #[test]
    fn next_allowed_keeps_instant_inside_window() {
        let mut config = fixed_config();
        config.allowed_windows = vec![window((9, 0), (18, 0))];
        let from = at(10, 42);
        assert_eq!(next_allowed_date(&config, from), from);
    }

    #[test]
    fn next_allowed_jumps_to_later_window_today() {
        let mut config = fixed_config();
        config.allowed_windows = vec![window((14, 0), (18, 0)), window((9, 0), (12, 0))];
        let next = next_allowed_date(&config, at(12, 30));
        assert_eq!(next, at(14, 0));
    }

    #[test]
    fn next_allowed_rolls_to_tomorrow_after_last_window() {
        let mut config = fixed_config();
        config.allowed_windows = vec![window((9, 0), (12, 0))];
        let next = next_allowed_date(&config, at(19, 0));
        assert_eq!(next, at(9, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn next_allowed_is_idempotent_and_satisfies_window_check() {
        let cases = vec![
            vec![window((9, 0), (12, 0)), window((14, 0), (18, 0))],
            vec![window((22, 0), (2, 0))],
            vec![window((0, 0), (23, 59))],
        ];
        let instants = [at(0, 0), at(8, 59), at(12, 30), at(13, 0), at(23, 45)];

        for windows in cases {
            let mut config = fixed_config();
            config.allowed_windows = windows;
            for from in instants {
                let once = next_allowed_date(&config, from);
                let twice = next_allowed_date(&config, once);
                assert_eq!(once, twice);
                assert!(any_window_contains(&config.allowed_windows, once.time()));
            }
        }
    }

    #[test]
    fn daily_count_rolls_over_at_midnight() {
        let mut state = state_with(20, 7);
        let sent_at = Utc.with_ymd_and_hms(2024, 3, 10, 23, 50, 0).unwrap();
        state.last_sent_at = Some(sent_at);

        // Same UTC day: counter stands.
        assert_eq!(effective_daily_count(&state, at(23, 55) - chrono::Duration::days(1)), 7);
        // Next day: counter is effectively zero until the next send.
        assert_eq!(effective_daily_count(&state, at(0, 5)), 0);
        // Never sent: zero.
        assert_eq!(effective_daily_count(&state_with(0, 3), at(12, 0)), 0);
    }

    #[test]
    fn validate_rejects_inverted_intervals() {
        let mut config = fixed_config();
        config.max_interval_seconds = 5;
        assert!(validate_config(&config).is_err());

        let mut config = fixed_config();
        config.long_pause_max_seconds = 1;
        assert!(validate_config(&config).is_err());

        let mut config = fixed_config();
        config.daily_limit = 0;
        assert!(validate_config(&config).is_err());

        assert!(validate_config(&fixed_config()).is_ok());
    }
}
