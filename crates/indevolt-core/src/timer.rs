//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Poll interval scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Fixed-period poll schedule. The first tick fires one full period after
/// creation; ticks missed while a fetch overran are dropped, not replayed.
#[derive(Debug)]
pub struct PollTimer {
    interval: Interval,
}

impl PollTimer {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}
