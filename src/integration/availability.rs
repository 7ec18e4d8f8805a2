//! "Is an update available?" probes consulted by the health-check loop.

use chrono::{DateTime, Local, Timelike};

pub trait UpdateAvailability: Send + Sync {
    fn update_available(&self, now: DateTime<Local>) -> bool;
}

impl<F> UpdateAvailability for F
where
    F: Fn(DateTime<Local>) -> bool + Send + Sync,
{
    fn update_available(&self, now: DateTime<Local>) -> bool {
        self(now)
    }
}

/// Reports an update as available during the first `window_minutes` of
/// every `every_hours`-th hour of the local day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindowProbe {
    every_hours: u32,
    window_minutes: u32,
}

impl ScheduleWindowProbe {
    pub fn new(every_hours: u32, window_minutes: u32) -> Self {
        Self {
            every_hours: every_hours.clamp(1, 24),
            window_minutes: window_minutes.clamp(1, 60),
        }
    }
}

impl Default for ScheduleWindowProbe {
    fn default() -> Self {
        Self::new(6, 5)
    }
}

impl UpdateAvailability for ScheduleWindowProbe {
    fn update_available(&self, now: DateTime<Local>) -> bool {
        now.hour() % self.every_hours == 0 && now.minute() < self.window_minutes
    }
}
