//! Gamemode hooks and the scoreboard helpers shared by every mode
//!
//! A gamemode owns match-specific content: which entities exist at start,
//! where players spawn, how the scoreboard is ranked and when the match is
//! decided. The scheduler calls into it at fixed points of the tick.

use crate::game::constants::Color;
use crate::game::entity::{EntityError, EntityHandle};
use crate::game::fields::{ScoreboardSlot, ARENA_FLAG_SHOWS_LEADER_ARROW};
use crate::game::state::GameState;
use crate::net::connection::ConnectionId;

/// Entity kind of player-controlled tanks
pub const TANK_KIND: &str = "TankBody";

/// Side that won a match
#[derive(Debug, Clone, PartialEq)]
pub struct Winner {
    pub name: String,
    pub color: Color,
}

/// Outcome of a scoreboard pass
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Continue,
    /// The terminal condition holds; the arena should start closing
    Close { winner: Option<Winner> },
}

/// Match-specific logic plugged into the tick loop
pub trait Gamemode: Send {
    fn name(&self) -> &'static str;

    /// Create teams, bases and other fixed entities; called once after the
    /// arena exists and before any connection is accepted
    fn setup(&mut self, state: &mut GameState) -> Result<(), EntityError>;

    /// Per-tick logic, run before movement and the arena tick
    fn tick(&mut self, _state: &mut GameState) -> Result<(), EntityError> {
        Ok(())
    }

    /// Place a freshly created tank for `connection`
    fn spawn_player(
        &mut self,
        state: &mut GameState,
        connection: ConnectionId,
        tank: EntityHandle,
    ) -> Result<(), EntityError>;

    /// Recompute the scoreboard; called from the arena tick in every state
    fn update_scoreboard(&mut self, state: &mut GameState) -> Result<Verdict, EntityError>;

    /// A connection is being removed at the start of this tick
    fn on_disconnect(&mut self, _state: &mut GameState, _connection: ConnectionId) {}
}

/// A connection whose camera currently controls a live tank
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePlayer {
    pub connection: ConnectionId,
    pub camera: EntityHandle,
    pub tank: EntityHandle,
    pub team: Option<EntityHandle>,
    pub score: f32,
    pub level: u32,
    pub x: f32,
    pub y: f32,
}

/// Live player tanks in connection order
pub fn active_players(state: &GameState) -> Vec<ActivePlayer> {
    let mut players = Vec::new();
    for connection in state.connections.values() {
        if connection.terminated {
            continue;
        }
        let Ok(camera) = state.store.get(connection.camera.entity()) else {
            continue;
        };
        let Ok(view) = camera.camera() else {
            continue;
        };
        let Some(tank) = state.store.resolve(view.player()) else {
            continue;
        };
        if tank.kind() != TANK_KIND {
            continue;
        }
        let (x, y) = tank
            .groups
            .position
            .as_ref()
            .map_or((0.0, 0.0), |p| (p.x(), p.y()));
        players.push(ActivePlayer {
            connection: connection.id,
            camera: camera.handle(),
            tank: tank.handle(),
            team: tank.groups.relations.as_ref().and_then(|r| r.team()),
            score: view.score(),
            level: view.level(),
            x,
            y,
        });
    }
    players
}

/// Highest score wins; the first player in connection order wins ties
pub fn pick_leader<'a>(players: impl IntoIterator<Item = &'a ActivePlayer>) -> Option<&'a ActivePlayer> {
    let mut leader: Option<&ActivePlayer> = None;
    for player in players {
        if leader.map_or(true, |l| player.score > l.score) {
            leader = Some(player);
        }
    }
    leader
}

/// Write a scoreboard row of the arena
pub fn write_slot(state: &mut GameState, index: usize, slot: ScoreboardSlot) -> Result<(), EntityError> {
    let arena = state.arena.entity();
    state
        .store
        .get_mut(arena)?
        .arena_mut()?
        .set_scoreboard_slot(index, slot);
    Ok(())
}

pub fn set_scoreboard_amount(state: &mut GameState, amount: u32) -> Result<(), EntityError> {
    let arena = state.arena.entity();
    state.store.get_mut(arena)?.arena_mut()?.set_scoreboard_amount(amount);
    Ok(())
}

/// Point the leader arrow at `leader`, or hide it
pub fn write_leader(state: &mut GameState, leader: Option<(f32, f32)>) -> Result<(), EntityError> {
    let arena = state.arena.entity();
    let group = state.store.get_mut(arena)?.arena_mut()?;
    match leader {
        Some((x, y)) => {
            group.set_leader_x(x);
            group.set_leader_y(y);
            group.set_flags(group.flags() | ARENA_FLAG_SHOWS_LEADER_ARROW);
        }
        None => group.set_flags(group.flags() & !ARENA_FLAG_SHOWS_LEADER_ARROW),
    }
    Ok(())
}
