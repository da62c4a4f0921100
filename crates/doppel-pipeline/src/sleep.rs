//! Sleep-hour deferral window.
//!
//! Pure minutes-of-day arithmetic. The common configuration ("23:00–07:00")
//! wraps midnight, so the in-window test and the wake-up computation both
//! handle start > end explicitly.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use doppel_core::config::SleepHoursConfig;

#[derive(Clone)]
pub struct SleepSchedule {
    config: SleepHoursConfig,
}

impl SleepSchedule {
    pub fn new(config: SleepHoursConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Is `now` inside the sleep window (operator-local time)?
    pub fn is_sleep_hours(&self, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return false;
        }
        let local = now + Duration::hours(i64::from(self.config.timezone_offset_hours));
        let minute_of_day = local.hour() * 60 + local.minute();
        let start = self.start_minutes();
        let end = self.end_minutes();

        if start == end {
            // Degenerate window: treat as disabled rather than always-on.
            false
        } else if start < end {
            (start..end).contains(&minute_of_day)
        } else {
            // Wraps midnight: sleeping when past start OR before end.
            minute_of_day >= start || minute_of_day < end
        }
    }

    /// Epoch ms of the next window end after `now` — when deferred
    /// messages wake up. Only meaningful while `is_sleep_hours(now)`.
    pub fn wakes_at_ms(&self, now: DateTime<Utc>) -> i64 {
        let offset = Duration::hours(i64::from(self.config.timezone_offset_hours));
        let local = now + offset;
        let end = self.end_minutes();
        let minute_of_day = local.hour() * 60 + local.minute();

        let today_end = Utc
            .with_ymd_and_hms(
                local.year(),
                local.month(),
                local.day(),
                u32::from(self.config.end_hour),
                u32::from(self.config.end_minute),
                0,
            )
            .single()
            .unwrap_or(local);

        let local_wake = if minute_of_day < end {
            today_end
        } else {
            today_end + Duration::days(1)
        };
        (local_wake - offset).timestamp_millis()
    }

    fn start_minutes(&self) -> u32 {
        u32::from(self.config.start_hour) * 60 + u32::from(self.config.start_minute)
    }

    fn end_minutes(&self) -> u32 {
        u32::from(self.config.end_hour) * 60 + u32::from(self.config.end_minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(start: (u8, u8), end: (u8, u8), offset: i8) -> SleepSchedule {
        SleepSchedule::new(SleepHoursConfig {
            enabled: true,
            start_hour: start.0,
            start_minute: start.1,
            end_hour: end.0,
            end_minute: end.1,
            timezone_offset_hours: offset,
        })
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, m, 0).unwrap()
    }

    #[test]
    fn wrapping_window_covers_both_sides_of_midnight() {
        let sched = schedule((23, 0), (7, 0), 0);
        assert!(sched.is_sleep_hours(at(23, 30)));
        assert!(sched.is_sleep_hours(at(3, 0)));
        assert!(sched.is_sleep_hours(at(6, 59)));
        assert!(!sched.is_sleep_hours(at(7, 0)));
        assert!(!sched.is_sleep_hours(at(12, 0)));
        assert!(!sched.is_sleep_hours(at(22, 59)));
    }

    #[test]
    fn non_wrapping_window() {
        let sched = schedule((13, 0), (14, 30), 0);
        assert!(sched.is_sleep_hours(at(13, 0)));
        assert!(sched.is_sleep_hours(at(14, 29)));
        assert!(!sched.is_sleep_hours(at(14, 30)));
        assert!(!sched.is_sleep_hours(at(12, 59)));
    }

    #[test]
    fn timezone_offset_shifts_the_window() {
        // 23:00–07:00 at UTC+2 → sleeping at 21:30 UTC.
        let sched = schedule((23, 0), (7, 0), 2);
        assert!(sched.is_sleep_hours(at(21, 30)));
        assert!(!sched.is_sleep_hours(at(20, 30)));
    }

    #[test]
    fn disabled_schedule_never_sleeps() {
        let mut config = SleepHoursConfig::default();
        config.enabled = false;
        let sched = SleepSchedule::new(config);
        assert!(!sched.is_sleep_hours(at(23, 30)));
    }

    #[test]
    fn wake_up_is_next_seven_oclock() {
        let sched = schedule((23, 0), (7, 0), 0);

        // At 23:30 the next end boundary is 07:00 tomorrow.
        let wake = sched.wakes_at_ms(at(23, 30));
        let wake_dt = DateTime::from_timestamp_millis(wake).unwrap();
        assert_eq!(wake_dt.day(), 2);
        assert_eq!(wake_dt.hour(), 7);

        // At 03:00 the next end boundary is 07:00 the same day.
        let wake = sched.wakes_at_ms(at(3, 0));
        let wake_dt = DateTime::from_timestamp_millis(wake).unwrap();
        assert_eq!(wake_dt.day(), 1);
        assert_eq!(wake_dt.hour(), 7);
    }

    #[test]
    fn degenerate_window_is_inert() {
        let sched = schedule((7, 0), (7, 0), 0);
        assert!(!sched.is_sleep_hours(at(7, 0)));
        assert!(!sched.is_sleep_hours(at(23, 0)));
    }
}
