//! Free-for-all arena with a score leaderboard and no end condition

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::game::constants::sandbox::ARENA_SIZE;
use crate::game::constants::{Color, SCOREBOARD_SLOTS};
use crate::game::entity::{EntityError, EntityHandle};
use crate::game::fields::ScoreboardSlot;
use crate::game::gamemode::{active_players, set_scoreboard_amount, write_leader, write_slot, Gamemode, Verdict};
use crate::game::state::GameState;
use crate::net::connection::ConnectionId;

pub struct SandboxMode {
    rng: StdRng,
}

impl SandboxMode {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SandboxMode {
    fn default() -> Self {
        Self::new()
    }
}

impl Gamemode for SandboxMode {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn setup(&mut self, state: &mut GameState) -> Result<(), EntityError> {
        state.arena.update_bounds(&mut state.store, ARENA_SIZE, ARENA_SIZE)
    }

    fn spawn_player(&mut self, state: &mut GameState, _connection: ConnectionId, tank: EntityHandle) -> Result<(), EntityError> {
        let bounds = state.arena.bounds(&state.store)?;
        let x = self.rng.gen_range(bounds.left..=bounds.right);
        let y = self.rng.gen_range(bounds.top..=bounds.bottom);
        let position = state.store.get_mut(tank)?.position_mut()?;
        position.set_x(x);
        position.set_y(y);
        Ok(())
    }

    fn update_scoreboard(&mut self, state: &mut GameState) -> Result<Verdict, EntityError> {
        let mut players = active_players(state);
        // Stable sort keeps connection order among equal scores
        players.sort_by(|a, b| b.score.total_cmp(&a.score));
        players.truncate(SCOREBOARD_SLOTS);

        for (index, player) in players.iter().enumerate() {
            let tank = state.store.get(player.tank)?;
            let name = tank.name().map(|n| n.name()).unwrap_or_default();
            let tank_marker = state.store.get(player.camera)?.camera()?.tank();
            write_slot(
                state,
                index,
                ScoreboardSlot {
                    color: Color::Tank,
                    name,
                    score: player.score,
                    tank: tank_marker,
                    suffix: String::new(),
                },
            )?;
        }

        write_leader(state, players.first().map(|p| (p.x, p.y)))?;
        set_scoreboard_amount(state, players.len() as u32)?;
        Ok(Verdict::Continue)
    }
}
