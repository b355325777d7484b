//! Tick timing and health classification
//!
//! Tracks how long each tick takes relative to its budget and how often ticks
//! actually start, so the session can log when the server falls behind.

use std::collections::VecDeque;
use std::time::Duration;

/// Fraction of the target rate below which the tick rate is critical
const CRITICAL_TPS_FRACTION: f32 = 0.8;

/// Tick health levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceStatus {
    /// < 30% of the tick budget
    Excellent,
    Good,
    /// > 70% of the budget
    Warning,
    /// > 90% of the budget
    Critical,
    /// > 150% of the budget, ticks are being skipped
    Catastrophic,
}

/// Rolling tick duration and interval monitor
pub struct PerformanceMonitor {
    tick_durations: VecDeque<Duration>,
    tick_intervals: VecDeque<Duration>,
    max_samples: usize,
    target_tick_duration: Duration,
    target_tps: f32,
    status: PerformanceStatus,
    tps_critical: bool,
    last_entity_count: usize,
}

impl PerformanceMonitor {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        let max_samples = (tick_rate as usize * 4).max(10);
        Self {
            tick_durations: VecDeque::with_capacity(max_samples),
            tick_intervals: VecDeque::with_capacity(max_samples),
            max_samples,
            target_tick_duration: Duration::from_secs_f32(1.0 / tick_rate as f32),
            target_tps: tick_rate as f32,
            status: PerformanceStatus::Excellent,
            tps_critical: false,
            last_entity_count: 0,
        }
    }

    fn push(window: &mut VecDeque<Duration>, max: usize, sample: Duration) {
        window.push_back(sample);
        while window.len() > max {
            window.pop_front();
        }
    }

    /// Record how long a tick took to simulate
    pub fn record_tick(&mut self, duration: Duration, entity_count: usize) {
        Self::push(&mut self.tick_durations, self.max_samples, duration);
        self.last_entity_count = entity_count;
        self.update_status();
    }

    /// Record the wall time between the starts of two consecutive ticks
    ///
    /// Returns the effective tick rate when it has just dropped below the
    /// critical fraction of the target, so the caller logs once per episode.
    pub fn record_interval(&mut self, interval: Duration) -> Option<f32> {
        Self::push(&mut self.tick_intervals, self.max_samples, interval);
        if self.tick_intervals.len() < 10 {
            return None;
        }

        let tps = self.effective_tps();
        let critical = tps < self.target_tps * CRITICAL_TPS_FRACTION;
        let crossed = critical && !self.tps_critical;
        self.tps_critical = critical;
        crossed.then_some(tps)
    }

    fn update_status(&mut self) {
        if self.tick_durations.len() < 10 {
            return;
        }

        let ratio = self.budget_usage_percent() / 100.0;
        self.status = if ratio < 0.3 {
            PerformanceStatus::Excellent
        } else if ratio < 0.7 {
            PerformanceStatus::Good
        } else if ratio < 0.9 {
            PerformanceStatus::Warning
        } else if ratio < 1.5 {
            PerformanceStatus::Critical
        } else {
            PerformanceStatus::Catastrophic
        };
    }

    fn average(window: &VecDeque<Duration>) -> Duration {
        if window.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = window.iter().sum();
        sum / window.len() as u32
    }

    pub fn average_tick_duration(&self) -> Duration {
        Self::average(&self.tick_durations)
    }

    /// Ticks per second actually achieved over the window
    pub fn effective_tps(&self) -> f32 {
        let interval = Self::average(&self.tick_intervals).as_secs_f32();
        if interval <= 0.0 {
            return self.target_tps;
        }
        1.0 / interval
    }

    /// Get the 95th percentile tick duration
    pub fn p95_tick_duration(&self) -> Duration {
        let mut sorted: Vec<_> = self.tick_durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len().saturating_sub(1))).copied().unwrap_or(Duration::ZERO)
    }

    pub fn status(&self) -> PerformanceStatus {
        self.status
    }

    pub fn is_tps_critical(&self) -> bool {
        self.tps_critical
    }

    /// Average tick duration as a percentage of the budget
    pub fn budget_usage_percent(&self) -> f32 {
        (self.average_tick_duration().as_secs_f32() / self.target_tick_duration.as_secs_f32()) * 100.0
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget, {:.1} tps, {} entities",
            self.status,
            self.budget_usage_percent(),
            self.effective_tps(),
            self.last_entity_count
        )
    }
}
