//! The world context owned by the tick loop
//!
//! Everything mutable about one match lives here: the entity store, the arena,
//! the connections and the deferred job queue. It is constructed once and
//! passed explicitly to the arena, the gamemode and the systems. Init order is
//! store, then arena, then gamemode setup, then connections.

use std::collections::BTreeMap;

use tracing::info;

use crate::game::arena::Arena;
use crate::game::constants::{arena, store, tick};
use crate::game::entity::{EntityError, EntityHandle};
use crate::game::jobs::JobQueue;
use crate::game::store::EntityStore;
use crate::net::connection::{Connection, ConnectionId};

/// Tunables fixed for the lifetime of a match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSettings {
    pub tick_rate: u32,
    pub max_entities: usize,
    pub close_delay_secs: u32,
}

impl WorldSettings {
    /// Ticks between the arena closing and the match ending
    pub fn close_delay_ticks(&self) -> u64 {
        self.close_delay_secs as u64 * self.tick_rate as u64
    }
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            tick_rate: tick::TICK_RATE,
            max_entities: store::MAX_ENTITIES,
            close_delay_secs: arena::CLOSE_DELAY_SECS,
        }
    }
}

/// Complete mutable state of one match
pub struct GameState {
    /// Number of the tick currently being (or next to be) simulated
    pub tick: u64,
    pub store: EntityStore,
    pub arena: Arena,
    /// Ordered by id so every per-connection pass is deterministic
    pub connections: BTreeMap<ConnectionId, Connection>,
    pub jobs: JobQueue,
    pub settings: WorldSettings,
}

impl GameState {
    pub fn new(settings: WorldSettings) -> Result<Self, EntityError> {
        let mut store = EntityStore::new(settings.max_entities);
        let arena = Arena::create(&mut store)?;
        info!(
            "World created ({} Hz, up to {} entities)",
            settings.tick_rate,
            store.max_entities()
        );
        Ok(Self {
            tick: 0,
            store,
            arena,
            connections: BTreeMap::new(),
            jobs: JobQueue::new(),
            settings,
        })
    }

    /// Queue a notification for every connection
    pub fn broadcast(&mut self, message: &str, color: u32, duration_ms: f32, tag: Option<&str>) {
        for connection in self.connections.values_mut() {
            connection.notify(message, color, duration_ms, tag);
        }
    }

    /// The live tank of a connection, if it has one
    pub fn player_of(&self, connection: ConnectionId) -> Option<EntityHandle> {
        self.connections
            .get(&connection)
            .and_then(|c| c.camera.player(&self.store))
    }

    /// Camera entity of a connection
    pub fn camera_of(&self, connection: ConnectionId) -> Option<EntityHandle> {
        self.connections.get(&connection).map(|c| c.camera.entity())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::camera::Camera;
    use crate::net::protocol::ServerMessage;

    #[test]
    fn test_new_world_has_only_the_arena() {
        let state = GameState::new(WorldSettings::default()).unwrap();
        assert_eq!(state.store.len(), 1);
        assert!(state.store.exists(state.arena.entity()));
        assert_eq!(state.tick, 0);
    }

    #[test]
    fn test_close_delay_ticks() {
        let settings = WorldSettings {
            tick_rate: 25,
            close_delay_secs: 5,
            ..Default::default()
        };
        assert_eq!(settings.close_delay_ticks(), 125);
    }

    #[test]
    fn test_broadcast_reaches_every_connection() {
        let mut state = GameState::new(WorldSettings::default()).unwrap();
        for id in 1..=3 {
            let camera = Camera::create(&mut state.store).unwrap();
            state.connections.insert(id, Connection::new(id, camera));
        }

        state.broadcast("hi", 0x00FF00, -1.0, None);
        for connection in state.connections.values_mut() {
            let outbox = connection.take_outbox();
            assert!(matches!(&outbox[..], [ServerMessage::Notification { .. }]));
        }
    }

    #[test]
    fn test_player_of_ignores_dead_tanks() {
        let mut state = GameState::new(WorldSettings::default()).unwrap();
        let camera = Camera::create(&mut state.store).unwrap();
        let camera_entity = camera.entity();
        state.connections.insert(1, Connection::new(1, camera));
        assert_eq!(state.player_of(1), None);

        let tank = state
            .store
            .create(crate::game::entity::EntityBuilder::new("TankBody"))
            .unwrap();
        state
            .store
            .get_mut(camera_entity)
            .unwrap()
            .camera_mut()
            .unwrap()
            .set_player(Some(tank));
        assert_eq!(state.player_of(1), Some(tank));

        state.store.delete(tank);
        assert_eq!(state.player_of(1), None);
    }
}
