//! Player tank creation

use tracing::debug;

use crate::game::behavior::DieAtZeroHealth;
use crate::game::constants::player::{HEALTH, SIZE};
use crate::game::constants::Color;
use crate::game::entity::{EntityBuilder, EntityError, EntityHandle};
use crate::game::fields::GroupKind;
use crate::game::gamemode::TANK_KIND;
use crate::game::state::GameState;

/// Create a tank at the origin and attach it to `camera`
///
/// The gamemode is responsible for placing it afterwards.
pub fn spawn_tank(state: &mut GameState, camera: EntityHandle, name: &str) -> Result<EntityHandle, EntityError> {
    let tank = state.store.create(
        EntityBuilder::new(TANK_KIND)
            .with(GroupKind::Relations)
            .with(GroupKind::Barrel)
            .with(GroupKind::Physics)
            .with(GroupKind::Health)
            .with(GroupKind::Name)
            .with(GroupKind::Position)
            .with(GroupKind::Style)
            .with(GroupKind::Score)
            .behavior(DieAtZeroHealth),
    )?;

    let entity = state.store.get_mut(tank)?;
    entity.relations_mut()?.set_owner(Some(camera));
    let physics = entity.physics_mut()?;
    physics.set_sides(1);
    physics.set_size(SIZE);
    let health = entity.health_mut()?;
    health.set_max_health(HEALTH);
    health.set_health(HEALTH);
    entity.name_mut()?.set_name(name.to_string());
    entity.style_mut()?.set_color(Color::Tank);

    let view = state.store.get_mut(camera)?.camera_mut()?;
    view.set_player(Some(tank));
    view.set_tank(0);
    view.set_level(1);

    debug!("Spawned tank {} for camera {}", tank, camera);
    Ok(tank)
}
