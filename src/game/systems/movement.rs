//! Input-driven tank movement
//!
//! Applies every connection's held keys to its tank, keeps the tank inside
//! the padded arena bounds, aims it at the mouse and moves the camera along.

use crate::game::constants::player::SPEED;
use crate::game::entity::{EntityError, EntityHandle};
use crate::game::state::GameState;
use crate::net::protocol::{input_flags, PlayerInput};
use crate::util::vec2::Vec2;

/// Direction of travel from held keys, normalized so diagonals are not faster
pub fn heading(input: &PlayerInput) -> Vec2 {
    let axis = |pos: u32, neg: u32| input.held(pos) as i8 as f32 - input.held(neg) as i8 as f32;
    Vec2::new(
        axis(input_flags::RIGHT, input_flags::LEFT),
        axis(input_flags::DOWN, input_flags::UP),
    )
    .normalize()
}

/// Move every controlled tank one tick
pub fn update(state: &mut GameState) -> Result<(), EntityError> {
    let bounds = state.arena.bounds(&state.store)?;

    let controlled: Vec<(EntityHandle, EntityHandle, PlayerInput)> = state
        .connections
        .values()
        .filter(|c| !c.terminated)
        .filter_map(|c| {
            let tank = c.camera.player(&state.store)?;
            Some((c.camera.entity(), tank, c.input))
        })
        .collect();

    for (camera, tank, input) in controlled {
        let position = state.store.get_mut(tank)?.position_mut()?;
        let current = Vec2::new(position.x(), position.y());
        let moved = current + heading(&input) * SPEED;
        let (x, y) = bounds.clamp_padded(moved.x, moved.y);
        position.set_x(x);
        position.set_y(y);

        let aim = Vec2::new(input.mouse_x, input.mouse_y) - Vec2::new(x, y);
        if !aim.is_zero(f32::EPSILON) {
            position.set_angle(aim.angle());
        }

        let view = state.store.get_mut(camera)?.camera_mut()?;
        view.set_camera_x(x);
        view.set_camera_y(y);
    }

    Ok(())
}
