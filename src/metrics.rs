//! Server metrics
//!
//! Counters are plain atomics written by the tick task and the transport and
//! summarised in the periodic stats log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::game::arena::ArenaState;
use crate::game::performance::PerformanceStatus;

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    // World
    pub entities: AtomicU64,
    pub players_alive: AtomicU64,
    /// 0 = open, 1 = closing, 2 = closed
    pub arena_state: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,
    /// 0 = Excellent .. 4 = Catastrophic
    pub performance_status: AtomicU64,
    pub entity_failures: AtomicU64,

    // Network
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub records_sent: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            entities: AtomicU64::new(0),
            players_alive: AtomicU64::new(0),
            arena_state: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            performance_status: AtomicU64::new(0),
            entity_failures: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            records_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn set_arena_state(&self, state: ArenaState) {
        let value = match state {
            ArenaState::Open => 0,
            ArenaState::Closing => 1,
            ArenaState::Closed => 2,
        };
        self.arena_state.store(value, Ordering::Relaxed);
    }

    pub fn set_performance_status(&self, status: PerformanceStatus) {
        let value = match status {
            PerformanceStatus::Excellent => 0,
            PerformanceStatus::Good => 1,
            PerformanceStatus::Warning => 2,
            PerformanceStatus::Critical => 3,
            PerformanceStatus::Catastrophic => 4,
        };
        self.performance_status.store(value, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// One-line summary for the periodic stats log
    pub fn summary(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        format!(
            "up {}s, {} ticks (last {}us, p95 {}us, max {}us), {} entities, {} alive players, \
             {} connections ({} rejected), {} records, {}/{} msgs out/in, {}/{} bytes out/in",
            self.uptime_seconds(),
            load(&self.tick_count),
            load(&self.tick_time_us),
            load(&self.tick_time_p95_us),
            load(&self.tick_time_max_us),
            load(&self.entities),
            load(&self.players_alive),
            load(&self.connections_active),
            load(&self.connections_rejected),
            load(&self.records_sent),
            load(&self.messages_sent),
            load(&self.messages_received),
            load(&self.bytes_sent),
            load(&self.bytes_received),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_summary_reports_counters() {
        let metrics = Metrics::new();
        metrics.entities.store(42, Ordering::Relaxed);
        metrics.connections_rejected.fetch_add(2, Ordering::Relaxed);
        metrics.set_arena_state(ArenaState::Closing);

        let summary = metrics.summary();
        assert!(summary.contains("42 entities"));
        assert!(summary.contains("(2 rejected)"));
        assert_eq!(metrics.arena_state.load(Ordering::Relaxed), 1);
    }
}
