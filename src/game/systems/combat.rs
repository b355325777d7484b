//! Damage application

use crate::game::entity::{EntityError, EntityHandle};
use crate::game::fields::HEALTH_FLAG_INVINCIBLE;
use crate::game::store::EntityStore;

/// Subtract `amount * multiplier` from the target's health
///
/// Returns the damage actually dealt. Invincible targets take none; health
/// never drops below zero. Removal at zero health is left to the target's
/// behavior.
pub fn apply_damage(
    store: &mut EntityStore,
    target: EntityHandle,
    amount: f32,
    multiplier: f32,
) -> Result<f32, EntityError> {
    let health = store.get_mut(target)?.health_mut()?;
    if health.flags() & HEALTH_FLAG_INVINCIBLE != 0 || amount <= 0.0 {
        return Ok(0.0);
    }
    let dealt = (amount * multiplier).min(health.health());
    health.set_health(health.health() - dealt);
    Ok(dealt)
}

/// Toggle the invincible flag
pub fn set_invincible(store: &mut EntityStore, target: EntityHandle, invincible: bool) -> Result<(), EntityError> {
    let health = store.get_mut(target)?.health_mut()?;
    let flags = if invincible {
        health.flags() | HEALTH_FLAG_INVINCIBLE
    } else {
        health.flags() & !HEALTH_FLAG_INVINCIBLE
    };
    health.set_flags(flags);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::EntityBuilder;
    use crate::game::fields::GroupKind;

    fn target(store: &mut EntityStore) -> EntityHandle {
        let handle = store.create(EntityBuilder::new("Nexus").with(GroupKind::Health)).unwrap();
        let health = store.get_mut(handle).unwrap().health_mut().unwrap();
        health.set_max_health(100.0);
        health.set_health(100.0);
        handle
    }

    #[test]
    fn test_damage_is_multiplied_and_floored() {
        let mut store = EntityStore::default();
        let t = target(&mut store);

        assert_eq!(apply_damage(&mut store, t, 10.0, 2.0).unwrap(), 20.0);
        assert_eq!(apply_damage(&mut store, t, 500.0, 1.0).unwrap(), 80.0);
        assert_eq!(store.get(t).unwrap().health().unwrap().health(), 0.0);
    }

    #[test]
    fn test_invincible_takes_nothing() {
        let mut store = EntityStore::default();
        let t = target(&mut store);
        set_invincible(&mut store, t, true).unwrap();

        assert_eq!(apply_damage(&mut store, t, 10.0, 1.0).unwrap(), 0.0);
        set_invincible(&mut store, t, false).unwrap();
        assert_eq!(apply_damage(&mut store, t, 10.0, 1.0).unwrap(), 10.0);
    }

    #[test]
    fn test_damage_without_health_group_fails() {
        let mut store = EntityStore::default();
        let wall = store.create(EntityBuilder::new("Wall")).unwrap();
        assert!(matches!(
            apply_damage(&mut store, wall, 1.0, 1.0),
            Err(EntityError::MissingGroup { .. })
        ));
    }
}
