//! The fixed-step tick scheduler
//!
//! One call to [`GameLoop::tick`] advances the match by exactly one step, in
//! a fixed order:
//!
//! 0. deferred jobs due this tick
//! 1. client events, connection removal and spawn requests
//! 2. gamemode logic and movement
//! 3. arena tick (scoreboard and lifecycle)
//! 4. entity behaviors
//! 5. per-connection replication
//! 6. reaping and dirty-state reset
//!
//! Only this loop mutates the world. Network tasks feed it through the
//! [`InputBuffer`] and receive its output as a [`TickReport`].

use tracing::{debug, info, warn};

use crate::game::entity::{EntityError, EntityHandle};
use crate::game::gamemode::Gamemode;
use crate::game::input_buffer::{ClientEvent, InputBuffer, InputSender};
use crate::game::jobs::Job;
use crate::game::state::{GameState, WorldSettings};
use crate::game::systems::{movement, spawn};
use crate::game::arena;
use crate::net::camera::Camera;
use crate::net::connection::{Connection, ConnectionId};
use crate::net::protocol::{ClientMessage, ServerMessage};

/// Game loop configuration
#[derive(Debug, Clone, Copy)]
pub struct GameLoopConfig {
    pub world: WorldSettings,
    /// Capacity of the inbound event queue
    pub input_capacity: usize,
}

impl Default for GameLoopConfig {
    fn default() -> Self {
        Self {
            world: WorldSettings::default(),
            input_capacity: 4096,
        }
    }
}

/// Messages produced for one connection during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub connection: ConnectionId,
    pub messages: Vec<ServerMessage>,
}

/// Everything a tick produced
#[derive(Debug, Default)]
pub struct TickReport {
    /// Number of the tick that ran
    pub tick: u64,
    pub outbound: Vec<Outbound>,
    /// Connections removed this tick; their transport side should be dropped
    pub closed: Vec<ConnectionId>,
    /// Entities deleted by the reaper
    pub reaped: usize,
    /// Entities whose behavior failed and were flagged for deletion
    pub failures: usize,
    /// The match-end job ran; the loop should stop
    pub ended: bool,
}

/// Owns the world and drives it one tick at a time
pub struct GameLoop {
    state: GameState,
    gamemode: Box<dyn Gamemode>,
    input: InputBuffer,
    ended: bool,
}

impl GameLoop {
    /// Build the world and run the gamemode setup
    pub fn new(config: GameLoopConfig, mut gamemode: Box<dyn Gamemode>) -> Result<Self, EntityError> {
        let mut state = GameState::new(config.world)?;
        gamemode.setup(&mut state)?;
        info!("Gamemode {} ready", gamemode.name());

        Ok(Self {
            state,
            gamemode,
            input: InputBuffer::new(config.input_capacity),
            ended: false,
        })
    }

    /// Handle for network tasks to push client events
    pub fn sender(&self) -> InputSender {
        self.input.sender()
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    pub fn gamemode(&self) -> &dyn Gamemode {
        self.gamemode.as_ref()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Run one full tick
    ///
    /// Errors from the arena or the gamemode are world-level failures and are
    /// returned to the caller. Per-entity and per-connection failures are
    /// isolated and reported in the [`TickReport`].
    pub fn tick(&mut self) -> Result<TickReport, EntityError> {
        let mut report = TickReport {
            tick: self.state.tick,
            ..Default::default()
        };

        self.run_jobs(&mut report);
        self.process_events(&mut report);
        self.remove_terminated(&mut report);
        self.process_spawns()?;

        self.gamemode.tick(&mut self.state)?;
        movement::update(&mut self.state)?;

        arena::tick(&mut self.state, self.gamemode.as_mut())?;

        report.failures = self.state.store.tick_entities(self.state.tick).len();

        self.replicate(&mut report);

        report.reaped = self.state.store.reap();
        self.state.store.wipe_dirty();
        self.state.tick += 1;
        report.ended = self.ended;

        Ok(report)
    }

    fn run_jobs(&mut self, report: &mut TickReport) {
        for job in self.state.jobs.drain_due(self.state.tick) {
            match job {
                Job::EndMatch => {
                    info!("Match ended at tick {}", self.state.tick);
                    self.ended = true;
                }
                Job::Broadcast {
                    message,
                    color,
                    duration_ms,
                } => self.state.broadcast(&message, color, duration_ms, None),
            }
        }
        report.ended = self.ended;
    }

    fn process_events(&mut self, report: &mut TickReport) {
        for event in self.input.drain() {
            match event {
                ClientEvent::Connected { connection } => self.accept(connection, report),
                ClientEvent::Message { connection, message } => self.handle_message(connection, message),
                ClientEvent::Disconnected { connection } => {
                    if let Some(conn) = self.state.connections.get_mut(&connection) {
                        conn.terminated = true;
                    }
                }
            }
        }
    }

    fn accept(&mut self, connection: ConnectionId, report: &mut TickReport) {
        match Camera::create(&mut self.state.store) {
            Ok(camera) => {
                let mut conn = Connection::new(connection, camera);
                conn.send(ServerMessage::Accepted { connection });
                self.state.connections.insert(connection, conn);
                debug!("Connection {} joined", connection);
            }
            Err(e) => {
                warn!("Rejecting connection {}: {}", connection, e);
                report.outbound.push(Outbound {
                    connection,
                    messages: vec![ServerMessage::Kicked {
                        reason: "Server full".to_string(),
                    }],
                });
                report.closed.push(connection);
            }
        }
    }

    fn handle_message(&mut self, connection: ConnectionId, message: ClientMessage) {
        let Some(conn) = self.state.connections.get_mut(&connection) else {
            return;
        };
        if conn.terminated {
            return;
        }

        match message {
            ClientMessage::Init { name } => conn.name = name,
            ClientMessage::Input(input) => conn.input = input,
            ClientMessage::Spawn { name } => conn.spawn_request = Some(name),
            ClientMessage::Ping => conn.send(ServerMessage::Pong),
            ClientMessage::Leave => conn.terminated = true,
        }
    }

    /// Drop terminated connections along with their tank and camera
    fn remove_terminated(&mut self, report: &mut TickReport) {
        let terminated: Vec<ConnectionId> = self
            .state
            .connections
            .values()
            .filter(|c| c.terminated)
            .map(|c| c.id)
            .collect();

        for id in terminated {
            self.gamemode.on_disconnect(&mut self.state, id);
            if let Some(tank) = self.state.player_of(id) {
                if let Err(e) = self.state.store.mark_for_deletion(tank) {
                    warn!("Failed to remove tank of connection {}: {}", id, e);
                }
            }
            if let Some(conn) = self.state.connections.remove(&id) {
                conn.camera.destroy(&mut self.state.store);
            }
            report.closed.push(id);
            debug!("Connection {} removed", id);
        }
    }

    fn process_spawns(&mut self) -> Result<(), EntityError> {
        let requests: Vec<(ConnectionId, EntityHandle, String)> = self
            .state
            .connections
            .values_mut()
            .filter_map(|c| c.spawn_request.take().map(|name| (c.id, c.camera.entity(), name)))
            .collect();

        for (id, camera, name) in requests {
            if !self.state.arena.is_open() {
                debug!("Spawn of connection {} ignored, arena not open", id);
                continue;
            }
            if self.state.player_of(id).is_some() {
                continue;
            }

            let tank = match spawn::spawn_tank(&mut self.state, camera, &name) {
                Ok(tank) => tank,
                Err(e @ EntityError::StoreFull(_)) => {
                    warn!("Spawn of connection {} failed: {}", id, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.gamemode.spawn_player(&mut self.state, id, tank)?;

            let (x, y) = {
                let position = self.state.store.get(tank)?.position()?;
                (position.x(), position.y())
            };
            let view = self.state.store.get_mut(camera)?.camera_mut()?;
            view.set_camera_x(x);
            view.set_camera_y(y);
            info!("{} spawned (connection {})", name, id);
        }

        Ok(())
    }

    /// Compile every camera; a failing camera only takes its connection down
    fn replicate(&mut self, report: &mut TickReport) {
        let store = &self.state.store;
        for conn in self.state.connections.values_mut() {
            let mut messages = conn.take_outbox();
            match conn.camera.compile(store) {
                Ok(records) => {
                    if !records.is_empty() {
                        messages.push(ServerMessage::Update {
                            tick: self.state.tick,
                            records,
                        });
                    }
                }
                Err(e) => {
                    warn!("Camera of connection {} failed: {}", conn.id, e);
                    conn.terminated = true;
                    messages.push(ServerMessage::Kicked {
                        reason: "Replication error".to_string(),
                    });
                }
            }
            if !messages.is_empty() {
                report.outbound.push(Outbound {
                    connection: conn.id,
                    messages,
                });
            }
        }
    }
}
