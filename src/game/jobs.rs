//! Deferred jobs consumed at the start of a future tick
//!
//! Anything that must happen "later" is queued here with the tick it is due
//! at and runs inside the tick loop, never from an independent timer.

use std::collections::BTreeMap;

/// Work to perform at a later tick
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Tear down the match; the tick loop stops after this tick
    EndMatch,
    /// Send a notification to every connection
    Broadcast {
        message: String,
        color: u32,
        duration_ms: f32,
    },
}

/// Jobs ordered by due tick, then by scheduling order
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: BTreeMap<(u64, u64), Job>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job to run at the start of `tick`
    pub fn schedule_at(&mut self, tick: u64, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.jobs.insert((tick, seq), job);
    }

    /// Queue a job `delay` ticks after `now`
    pub fn schedule_in(&mut self, now: u64, delay: u64, job: Job) {
        self.schedule_at(now.saturating_add(delay), job);
    }

    /// Remove and return every job due at or before `tick`
    pub fn drain_due(&mut self, tick: u64) -> Vec<Job> {
        let later = self.jobs.split_off(&(tick.saturating_add(1), 0));
        let due = std::mem::replace(&mut self.jobs, later);
        due.into_values().collect()
    }

    pub fn contains(&self, job: &Job) -> bool {
        self.jobs.values().any(|j| j == job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
