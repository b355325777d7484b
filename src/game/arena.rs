//! Arena lifecycle: bounds, scoreboard surface and the OPEN/CLOSING/CLOSED
//! state machine
//!
//! Transitions only move forward. The arena closes when the gamemode reports
//! a decided match, finishes closing once no solid player tank remains, and
//! then queues the end of the match as a deferred job.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::constants::arena::{ARENA_PADDING, CLOSER_DAMAGE};
use crate::game::entity::{EntityBuilder, EntityError, EntityHandle};
use crate::game::fields::GroupKind;
use crate::game::gamemode::{Gamemode, Verdict};
use crate::game::jobs::Job;
use crate::game::state::GameState;
use crate::game::store::EntityStore;
use crate::game::systems::combat::apply_damage;

/// Lifecycle state of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArenaState {
    Open,
    Closing,
    Closed,
}

/// Axis-aligned arena rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Bounds {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    /// Clamp a point to the bounds grown by the arena padding
    pub fn clamp_padded(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x.clamp(self.left - ARENA_PADDING, self.right + ARENA_PADDING),
            y.clamp(self.top - ARENA_PADDING, self.bottom + ARENA_PADDING),
        )
    }
}

/// The match-wide arena entity and its lifecycle state
#[derive(Debug)]
pub struct Arena {
    entity: EntityHandle,
    state: ArenaState,
    end_scheduled: bool,
}

impl Arena {
    /// Register the global arena entity
    pub fn create(store: &mut EntityStore) -> Result<Self, EntityError> {
        let entity = store.create(EntityBuilder::new("Arena").with(GroupKind::Arena).global())?;
        Ok(Self {
            entity,
            state: ArenaState::Open,
            end_scheduled: false,
        })
    }

    #[inline]
    pub fn entity(&self) -> EntityHandle {
        self.entity
    }

    #[inline]
    pub fn state(&self) -> ArenaState {
        self.state
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == ArenaState::Open
    }

    pub fn bounds(&self, store: &EntityStore) -> Result<Bounds, EntityError> {
        let arena = store.get(self.entity)?.arena()?;
        Ok(Bounds {
            left: arena.left_x(),
            right: arena.right_x(),
            top: arena.top_y(),
            bottom: arena.bottom_y(),
        })
    }

    /// Center the bounds on the origin with the given size
    pub fn update_bounds(&self, store: &mut EntityStore, width: f32, height: f32) -> Result<(), EntityError> {
        let arena = store.get_mut(self.entity)?.arena_mut()?;
        arena.set_left_x(-width / 2.0);
        arena.set_right_x(width / 2.0);
        arena.set_top_y(-height / 2.0);
        arena.set_bottom_y(height / 2.0);
        Ok(())
    }

    /// OPEN -> CLOSING; returns whether the transition happened
    pub fn close(&mut self) -> bool {
        if self.state != ArenaState::Open {
            return false;
        }
        self.state = ArenaState::Closing;
        true
    }

    /// CLOSING -> CLOSED; returns whether the transition happened
    fn finish(&mut self) -> bool {
        if self.state != ArenaState::Closing {
            return false;
        }
        self.state = ArenaState::Closed;
        true
    }
}

/// Player tanks that still occupy the arena
fn solid_players(state: &GameState) -> Vec<EntityHandle> {
    state
        .connections
        .keys()
        .filter_map(|id| state.player_of(*id))
        .filter(|tank| {
            state
                .store
                .get(*tank)
                .ok()
                .and_then(|e| e.groups.physics.as_ref())
                .is_some_and(|p| p.sides() > 0)
        })
        .collect()
}

/// Step 3 of the tick: scoreboard, terminal condition and closing progress
pub fn tick(state: &mut GameState, gamemode: &mut dyn Gamemode) -> Result<(), EntityError> {
    // A match decided this tick finishes closing no earlier than the next one
    let was_closing = state.arena.state() == ArenaState::Closing;

    let arena_entity = state.arena.entity();
    let connections = state.connection_count() as u32;
    state
        .store
        .get_mut(arena_entity)?
        .arena_mut()?
        .set_player_count(connections);

    if let Verdict::Close { winner } = gamemode.update_scoreboard(state)? {
        if state.arena.close() {
            state.broadcast("Arena closed: No players can join", 0xFF0000, -1.0, None);
            match winner {
                Some(winner) => {
                    info!("Arena closing at tick {}: {} won", state.tick, winner.name);
                    let message = format!("Team {} won the game!", winner.name);
                    state.broadcast(&message, winner.color.hex(), -1.0, None);
                }
                None => info!("Arena closing at tick {}", state.tick),
            }
        }
    }

    if was_closing {
        let remaining = solid_players(state);
        if remaining.is_empty() {
            if state.arena.finish() {
                info!("Arena closed at tick {}", state.tick);
            }
        } else {
            // Drain the stragglers; their behavior removes them at zero health
            for tank in remaining {
                if state.store.get(tank)?.groups.health.is_some() {
                    apply_damage(&mut state.store, tank, CLOSER_DAMAGE, 1.0)?;
                }
            }
        }
    }

    if state.arena.state() == ArenaState::Closed && !state.arena.end_scheduled {
        state.arena.end_scheduled = true;
        let delay = state.settings.close_delay_ticks();
        state.jobs.schedule_in(state.tick, delay, Job::EndMatch);
        info!("Match ends in {} ticks", delay);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::gamemode::Winner;
    use crate::game::constants::Color;
    use crate::game::state::WorldSettings;
    use crate::net::connection::{Connection, ConnectionId};

    /// Closes as soon as `decided` is set
    struct Scripted {
        decided: bool,
    }

    impl Gamemode for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn setup(&mut self, _state: &mut GameState) -> Result<(), EntityError> {
            Ok(())
        }

        fn spawn_player(&mut self, _: &mut GameState, _: ConnectionId, _: EntityHandle) -> Result<(), EntityError> {
            Ok(())
        }

        fn update_scoreboard(&mut self, _state: &mut GameState) -> Result<Verdict, EntityError> {
            Ok(if self.decided {
                Verdict::Close {
                    winner: Some(Winner {
                        name: "RED".to_string(),
                        color: Color::TeamRed,
                    }),
                }
            } else {
                Verdict::Continue
            })
        }
    }

    fn world() -> GameState {
        GameState::new(WorldSettings::default()).unwrap()
    }

    fn run(state: &mut GameState, mode: &mut Scripted) {
        tick(state, mode).unwrap();
        state.tick += 1;
    }

    #[test]
    fn test_update_bounds_centers_on_origin() {
        let mut state = world();
        state.arena.update_bounds(&mut state.store, 100.0, 50.0).unwrap();

        let bounds = state.arena.bounds(&state.store).unwrap();
        assert_eq!(bounds.left, -50.0);
        assert_eq!(bounds.bottom, 25.0);
        assert_eq!(bounds.width(), 100.0);
        assert_eq!(bounds.clamp_padded(1000.0, 0.0), (50.0 + ARENA_PADDING, 0.0));
    }

    #[test]
    fn test_stays_open_until_decided() {
        let mut state = world();
        let mut mode = Scripted { decided: false };
        for _ in 0..10 {
            run(&mut state, &mut mode);
        }
        assert_eq!(state.arena.state(), ArenaState::Open);
        assert!(state.jobs.is_empty());
    }

    #[test]
    fn test_close_then_closed_on_next_tick() {
        let mut state = world();
        let mut mode = Scripted { decided: true };

        run(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Closing);
        assert!(state.jobs.is_empty());

        run(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Closed);
        assert_eq!(state.jobs.len(), 1);
    }

    #[test]
    fn test_closed_is_terminal_and_end_scheduled_once() {
        let mut state = world();
        let mut mode = Scripted { decided: true };
        for _ in 0..20 {
            run(&mut state, &mut mode);
        }
        assert_eq!(state.arena.state(), ArenaState::Closed);
        assert_eq!(state.jobs.len(), 1);

        let due = 1 + state.settings.close_delay_ticks();
        assert!(state.jobs.drain_due(due - 1).is_empty());
        assert_eq!(state.jobs.drain_due(due), vec![Job::EndMatch]);
        assert!(!state.arena.close());
    }

    #[test]
    fn test_closing_waits_for_solid_players() {
        let mut state = world();
        let camera = crate::net::camera::Camera::create(&mut state.store).unwrap();
        let camera_entity = camera.entity();
        state.connections.insert(1, Connection::new(1, camera));
        let tank = state
            .store
            .create(EntityBuilder::new("TankBody").with(GroupKind::Physics))
            .unwrap();
        state.store.get_mut(tank).unwrap().physics_mut().unwrap().set_sides(1);
        state
            .store
            .get_mut(camera_entity)
            .unwrap()
            .camera_mut()
            .unwrap()
            .set_player(Some(tank));

        let mut mode = Scripted { decided: true };
        for _ in 0..5 {
            run(&mut state, &mut mode);
        }
        assert_eq!(state.arena.state(), ArenaState::Closing);

        // Spectators do not hold the arena open
        state.store.get_mut(tank).unwrap().physics_mut().unwrap().set_sides(0);
        run(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Closed);
    }

    #[test]
    fn test_closing_drains_remaining_tanks() {
        let mut state = world();
        let camera = crate::net::camera::Camera::create(&mut state.store).unwrap();
        let camera_entity = camera.entity();
        state.connections.insert(1, Connection::new(1, camera));
        let tank = crate::game::systems::spawn::spawn_tank(&mut state, camera_entity, "last").unwrap();

        let mut mode = Scripted { decided: true };
        run(&mut state, &mut mode);
        let before = state.store.get(tank).unwrap().health().unwrap().health();
        run(&mut state, &mut mode);
        let after = state.store.get(tank).unwrap().health().unwrap().health();
        assert_eq!(before - after, CLOSER_DAMAGE);

        for _ in 0..20 {
            run(&mut state, &mut mode);
            state.store.tick_entities(state.tick);
        }
        assert!(!state.store.exists(tank));
        assert_eq!(state.arena.state(), ArenaState::Closed);
    }

    #[test]
    fn test_winner_is_announced() {
        let mut state = world();
        let camera = crate::net::camera::Camera::create(&mut state.store).unwrap();
        state.connections.insert(1, Connection::new(1, camera));

        run(&mut state, &mut Scripted { decided: true });
        let outbox = state.connections.get_mut(&1).unwrap().take_outbox();
        assert!(matches!(
            &outbox[..],
            [_, crate::net::protocol::ServerMessage::Notification { message, .. }] if message == "Team RED won the game!"
        ));
    }
}
