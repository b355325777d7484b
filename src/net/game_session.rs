//! Game session - runs the tick loop and ships its output to connections

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::game::entity::EntityError;
use crate::game::game_loop::{GameLoop, TickReport};
use crate::game::performance::{PerformanceMonitor, PerformanceStatus};
use crate::metrics::Metrics;
use crate::net::connection::ConnectionId;
use crate::net::framing::frame;
use crate::net::protocol::{encode, ServerMessage};
use crate::net::transport::{deliver, release, Delivery, Writers};

/// The tick loop plus everything needed to deliver its output
pub struct GameSession {
    game_loop: GameLoop,
    writers: Writers,
    metrics: Arc<Metrics>,
    performance: PerformanceMonitor,
    max_message_size: usize,
    last_tick_start: Option<Instant>,
}

impl GameSession {
    pub fn new(game_loop: GameLoop, writers: Writers, metrics: Arc<Metrics>, max_message_size: usize) -> Self {
        let tick_rate = game_loop.state().settings.tick_rate;
        Self {
            game_loop,
            writers,
            metrics,
            performance: PerformanceMonitor::new(tick_rate),
            max_message_size,
            last_tick_start: None,
        }
    }

    pub fn game_loop(&self) -> &GameLoop {
        &self.game_loop
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    /// Run one tick, deliver its output and update the monitors
    pub fn step(&mut self) -> Result<TickReport, EntityError> {
        let started = Instant::now();
        if let Some(previous) = self.last_tick_start.replace(started) {
            if let Some(tps) = self.performance.record_interval(started - previous) {
                warn!(
                    "Tick rate dropped to {:.1} tps (target {})",
                    tps,
                    self.game_loop.state().settings.tick_rate
                );
            }
        }

        let report = self.game_loop.tick()?;
        self.dispatch(&report);

        let elapsed = started.elapsed();
        let state = self.game_loop.state();
        let previous_status = self.performance.status();
        self.performance.record_tick(elapsed, state.store.len());
        if self.performance.status() != previous_status
            && matches!(
                self.performance.status(),
                PerformanceStatus::Critical | PerformanceStatus::Catastrophic
            )
        {
            warn!("Tick budget: {}", self.performance.status_message());
        }

        self.metrics.record_tick_time(elapsed);
        self.metrics.entities.store(state.store.len() as u64, Ordering::Relaxed);
        let alive = state
            .connections
            .keys()
            .filter(|id| state.player_of(**id).is_some())
            .count();
        self.metrics.players_alive.store(alive as u64, Ordering::Relaxed);
        self.metrics.set_arena_state(state.arena.state());
        self.metrics.set_performance_status(self.performance.status());
        if report.failures > 0 {
            self.metrics
                .entity_failures
                .fetch_add(report.failures as u64, Ordering::Relaxed);
        }

        Ok(report)
    }

    /// Encode and queue every outbound message; drop connections that lag
    fn dispatch(&mut self, report: &TickReport) {
        let mut lagging: Vec<ConnectionId> = Vec::new();

        for outbound in &report.outbound {
            for message in &outbound.messages {
                if let ServerMessage::Update { records, .. } = message {
                    self.metrics
                        .records_sent
                        .fetch_add(records.len() as u64, Ordering::Relaxed);
                }
                let framed = match encode(message).map(|data| frame(&data, self.max_message_size)) {
                    Ok(Ok(framed)) => framed,
                    Ok(Err(e)) => {
                        warn!("Dropping message for {}: {}", outbound.connection, e);
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to encode message for {}: {}", outbound.connection, e);
                        continue;
                    }
                };
                match deliver(&self.writers, outbound.connection, framed) {
                    Delivery::Queued => {}
                    Delivery::Gone => break,
                    Delivery::Backlogged => {
                        lagging.push(outbound.connection);
                        break;
                    }
                }
            }
        }

        for id in lagging {
            warn!("Connection {} is not keeping up, dropping it", id);
            if let Some(conn) = self.game_loop.state_mut().connections.get_mut(&id) {
                conn.terminated = true;
            }
            release(&self.writers, id);
        }
        for id in &report.closed {
            release(&self.writers, *id);
        }
    }
}

/// Drive the session at its tick rate until the match ends
///
/// A world-level error stops the loop and is returned.
pub async fn run(mut session: GameSession) -> anyhow::Result<()> {
    let tick_rate = session.game_loop.state().settings.tick_rate.max(1);
    let mut ticker = interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        "Game loop started at {} Hz ({})",
        tick_rate,
        session.game_loop.gamemode().name()
    );
    let start = Instant::now();
    let stats_every = tick_rate as u64 * 30;

    loop {
        ticker.tick().await;

        let report = match session.step() {
            Ok(report) => report,
            Err(e) => {
                error!("Tick {} failed: {}", session.game_loop.state().tick, e);
                return Err(e.into());
            }
        };
        if report.reaped > 0 {
            debug!("Tick {}: reaped {} entities", report.tick, report.reaped);
        }

        if report.tick % stats_every == 0 && report.tick > 0 {
            let state = session.game_loop.state();
            info!(
                "Game: {}s, tick {}, {} connections, {} entities, arena {:?} | Perf: {:?} ({:.1}%)",
                start.elapsed().as_secs(),
                state.tick,
                state.connection_count(),
                state.store.len(),
                state.arena.state(),
                session.performance.status(),
                session.performance.budget_usage_percent()
            );
            debug!("Metrics: {}", session.metrics.summary());
        }

        if report.ended {
            info!("Match over after {} ticks", report.tick + 1);
            return Ok(());
        }
    }
}
