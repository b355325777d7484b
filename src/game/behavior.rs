//! Per-entity tick hooks
//!
//! The store ticks every alive entity once per step in creation order. An
//! entity without a behavior does nothing; variants attach one at creation.

use crate::game::entity::{EntityError, EntityHandle, EntityState};
use crate::game::store::EntityStore;

/// Logic run for one entity during the entity tick pass
///
/// The behavior is detached from its entity while it runs, so it may freely
/// read and write any entity in the store, including its own.
pub trait Behavior: Send {
    fn tick(&mut self, this: EntityHandle, store: &mut EntityStore, tick: u64) -> Result<(), EntityError>;
}

/// Expires the entity after a fixed number of ticks
#[derive(Debug, Clone)]
pub struct Lifetime {
    remaining: u32,
}

impl Lifetime {
    pub fn new(ticks: u32) -> Self {
        Self { remaining: ticks }
    }
}

impl Behavior for Lifetime {
    fn tick(&mut self, this: EntityHandle, store: &mut EntityStore, _tick: u64) -> Result<(), EntityError> {
        if self.remaining == 0 {
            store.get_mut(this)?.state.insert(EntityState::NEEDS_DELETE);
            return Ok(());
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// Moves the entity by a constant velocity each tick
#[derive(Debug, Clone)]
pub struct Drift {
    pub vx: f32,
    pub vy: f32,
}

impl Behavior for Drift {
    fn tick(&mut self, this: EntityHandle, store: &mut EntityStore, _tick: u64) -> Result<(), EntityError> {
        let position = store.get_mut(this)?.position_mut()?;
        let (x, y) = (position.x(), position.y());
        position.set_x(x + self.vx);
        position.set_y(y + self.vy);
        Ok(())
    }
}

/// Deletes the entity once its health is depleted
#[derive(Debug, Clone, Default)]
pub struct DieAtZeroHealth;

impl Behavior for DieAtZeroHealth {
    fn tick(&mut self, this: EntityHandle, store: &mut EntityStore, _tick: u64) -> Result<(), EntityError> {
        if store.get(this)?.health()?.health() <= 0.0 {
            store.delete(this);
        }
        Ok(())
    }
}
