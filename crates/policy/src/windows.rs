//! Time-of-day window checks. Bounds are inclusive on both ends; a
//! window whose start is later than its end wraps past midnight.

use chrono::{NaiveTime, Timelike};
use dispatch_core::types::TimeWindow;

fn minutes_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Whether `t` falls inside `window`, wrap-aware.
pub fn window_contains(window: &TimeWindow, t: NaiveTime) -> bool {
    let minutes = minutes_of_day(t);
    let start = minutes_of_day(window.start);
    let end = minutes_of_day(window.end);

    if start <= end {
        minutes >= start && minutes <= end
    } else {
        // window crosses midnight
        minutes >= start || minutes <= end
    }
}

/// Whether `t` falls inside at least one of `windows`.
pub fn any_window_contains(windows: &[TimeWindow], t: NaiveTime) -> bool {
    windows.iter().any(|w| window_contains(w, t))
}

pub(crate) fn start_minutes(window: &TimeWindow) -> u32 {
    minutes_of_day(window.start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow::new(
            NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        )
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn plain_window_is_inclusive_on_both_ends() {
        let w = window((9, 0), (18, 0));
        assert!(window_contains(&w, at(9, 0)));
        assert!(window_contains(&w, at(12, 30)));
        assert!(window_contains(&w, at(18, 0)));
        assert!(!window_contains(&w, at(8, 59)));
        assert!(!window_contains(&w, at(18, 1)));
    }

    #[test]
    fn wrap_window_covers_both_sides_of_midnight() {
        let w = window((22, 0), (2, 0));
        assert!(window_contains(&w, at(23, 15)));
        assert!(window_contains(&w, at(0, 30)));
        assert!(window_contains(&w, at(2, 0)));
        assert!(window_contains(&w, at(22, 0)));
        assert!(!window_contains(&w, at(12, 0)));
        assert!(!window_contains(&w, at(2, 1)));
    }

    #[test]
    fn any_window_checks_all() {
        let windows = vec![window((9, 0), (12, 0)), window((14, 0), (18, 0))];
        assert!(any_window_contains(&windows, at(10, 0)));
        assert!(any_window_contains(&windows, at(15, 0)));
        assert!(!any_window_contains(&windows, at(13, 0)));
        assert!(!any_window_contains(&[], at(13, 0)));
    }
}
