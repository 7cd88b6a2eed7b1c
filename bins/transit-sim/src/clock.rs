use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use std::time::Duration;

/// Simulated wall clock advanced by a fixed step per tick
#[derive(Debug, Clone)]
pub struct SimulationClock {
    now: DateTime<Utc>,
    time_step: Duration,
}

impl SimulationClock {
    pub fn new(start: DateTime<Utc>, time_step: Duration) -> Self {
        Self { now: start, time_step }
    }

    /// Midnight on the first day of zero-based `month` in `year`.
    pub fn starting_in(year: i32, month: u32, time_step: Duration) -> Option<Self> {
        let start = Utc.with_ymd_and_hms(year, month + 1, 1, 0, 0, 0).single()?;
        Some(Self::new(start, time_step))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn time_step(&self) -> Duration {
        self.time_step
    }

    /// Zero-based month of the current simulated time
    pub fn month(&self) -> u32 {
        self.now.month0()
    }

    pub fn advance(&mut self) -> DateTime<Utc> {
        // Steps come from configuration in whole seconds.
        self.now += ChronoDuration::seconds(self.time_step.as_secs() as i64);
        self.now
    }
}
