//! Two-team core defence
//!
//! Red and Blue each own a spawn base and a nexus. Both nexuses are
//! invincible for the first minutes of the match. Once a nexus falls its
//! team can no longer spawn, and the match is decided when the fallen team
//! runs out of live players. Red is listed first and wins every tie.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::game::behavior::DieAtZeroHealth;
use crate::game::constants::nexus::{
    ARENA_SIZE, BASE_SIZE, END_PHASE_DAMAGE_MULTIPLIER, INVINCIBILITY_MINUTES, NEXUS_HEALTH, NEXUS_SIZE,
    PASSIVE_SCORE,
};
use crate::game::constants::player::SPECTATOR_TANK;
use crate::game::constants::Color;
use crate::game::entity::{EntityBuilder, EntityError, EntityHandle};
use crate::game::fields::{GroupKind, ScoreboardSlot};
use crate::game::gamemode::{
    active_players, pick_leader, set_scoreboard_amount, write_leader, write_slot, ActivePlayer, Gamemode,
    Verdict, Winner,
};
use crate::game::jobs::Job;
use crate::game::state::GameState;
use crate::game::systems::combat::{apply_damage, set_invincible};
use crate::net::connection::ConnectionId;

const RED: usize = 0;
const BLUE: usize = 1;

/// One team and the structures it owns
#[derive(Debug, Clone)]
struct Side {
    name: &'static str,
    color: Color,
    team: EntityHandle,
    spawn_base: EntityHandle,
    nexus: EntityHandle,
}

impl Side {
    fn winner(&self) -> Winner {
        Winner {
            name: self.name.to_string(),
            color: self.color,
        }
    }
}

pub struct NexusMode {
    sides: Vec<Side>,
    /// Sticky team choice per connection
    assignments: BTreeMap<ConnectionId, usize>,
    invincibility_left: u64,
    damage_multiplier: f32,
    rng: StdRng,
}

impl NexusMode {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic team tie-breaks and spawn offsets
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            sides: Vec::new(),
            assignments: BTreeMap::new(),
            invincibility_left: 0,
            damage_multiplier: 1.0,
            rng,
        }
    }

    pub fn red_nexus(&self) -> Option<EntityHandle> {
        self.sides.get(RED).map(|s| s.nexus)
    }

    pub fn blue_nexus(&self) -> Option<EntityHandle> {
        self.sides.get(BLUE).map(|s| s.nexus)
    }

    pub fn red_team(&self) -> Option<EntityHandle> {
        self.sides.get(RED).map(|s| s.team)
    }

    pub fn blue_team(&self) -> Option<EntityHandle> {
        self.sides.get(BLUE).map(|s| s.team)
    }

    pub fn invincibility_left(&self) -> u64 {
        self.invincibility_left
    }

    pub fn damage_multiplier(&self) -> f32 {
        self.damage_multiplier
    }

    /// Damage a nexus with the current phase multiplier applied
    pub fn damage_nexus(&self, state: &mut GameState, nexus: EntityHandle, amount: f32) -> Result<f32, EntityError> {
        apply_damage(&mut state.store, nexus, amount, self.damage_multiplier)
    }

    fn create_side(
        state: &mut GameState,
        name: &'static str,
        color: Color,
        spawn_at: (f32, f32),
        nexus_at: (f32, f32),
    ) -> Result<Side, EntityError> {
        let store = &mut state.store;

        let team = store.create(
            EntityBuilder::new("Team")
                .with(GroupKind::Team)
                .with(GroupKind::Name)
                .global(),
        )?;
        let entity = store.get_mut(team)?;
        entity.team_mut()?.set_team_color(color);
        entity.name_mut()?.set_name(name.to_string());

        let mut base = |x: f32, y: f32| -> Result<EntityHandle, EntityError> {
            let handle = store.create(
                EntityBuilder::new("TeamBase")
                    .with(GroupKind::Relations)
                    .with(GroupKind::Physics)
                    .with(GroupKind::Position)
                    .with(GroupKind::Style),
            )?;
            let entity = store.get_mut(handle)?;
            entity.relations_mut()?.set_team(Some(team));
            let physics = entity.physics_mut()?;
            physics.set_sides(2);
            physics.set_size(BASE_SIZE);
            physics.set_width(BASE_SIZE);
            let position = entity.position_mut()?;
            position.set_x(x);
            position.set_y(y);
            entity.style_mut()?.set_color(color);
            Ok(handle)
        };
        let spawn_base = base(spawn_at.0, spawn_at.1)?;
        let nexus_base = base(nexus_at.0, nexus_at.1)?;

        let nexus = store.create(
            EntityBuilder::new("Nexus")
                .with(GroupKind::Relations)
                .with(GroupKind::Physics)
                .with(GroupKind::Health)
                .with(GroupKind::Name)
                .with(GroupKind::Position)
                .with(GroupKind::Style)
                .behavior(DieAtZeroHealth),
        )?;
        let entity = store.get_mut(nexus)?;
        let relations = entity.relations_mut()?;
        relations.set_team(Some(team));
        relations.set_parent(Some(nexus_base));
        let physics = entity.physics_mut()?;
        physics.set_sides(1);
        physics.set_size(NEXUS_SIZE);
        let health = entity.health_mut()?;
        health.set_max_health(NEXUS_HEALTH);
        health.set_health(NEXUS_HEALTH);
        entity.name_mut()?.set_name(format!("{} Nexus", name));
        let position = entity.position_mut()?;
        position.set_x(nexus_at.0);
        position.set_y(nexus_at.1);
        entity.style_mut()?.set_color(color);
        set_invincible(store, nexus, true)?;

        store.get_mut(team)?.team_mut()?.set_mothership(Some(nexus));

        Ok(Side {
            name,
            color,
            team,
            spawn_base,
            nexus,
        })
    }

    /// Team for a connection: sticky, else the surviving team, else the
    /// smaller team with a coin flip on ties
    fn assign_side(&mut self, state: &GameState, connection: ConnectionId) -> usize {
        if let Some(side) = self.assignments.get(&connection) {
            return *side;
        }

        let red_alive = state.store.exists(self.sides[RED].nexus);
        let blue_alive = state.store.exists(self.sides[BLUE].nexus);
        if red_alive && !blue_alive {
            return RED;
        }
        if blue_alive && !red_alive {
            return BLUE;
        }

        self.assignments
            .retain(|id, _| state.connections.get(id).is_some_and(|c| !c.terminated));
        let red = self.assignments.values().filter(|s| **s == RED).count();
        let blue = self.assignments.len() - red;

        if red == blue {
            if self.rng.gen_bool(0.5) {
                BLUE
            } else {
                RED
            }
        } else if red < blue {
            RED
        } else {
            BLUE
        }
    }

    fn players_on<'a>(&self, players: &'a [ActivePlayer], side: usize) -> Vec<&'a ActivePlayer> {
        let team = self.sides[side].team;
        players.iter().filter(|p| p.team == Some(team)).collect()
    }

    fn nexus_slot(&self, state: &GameState, side: usize) -> Result<ScoreboardSlot, EntityError> {
        let side = &self.sides[side];
        let health = state.store.get(side.nexus)?.health()?.health();
        Ok(ScoreboardSlot {
            color: side.color,
            name: format!("{} Nexus", side.name),
            score: health,
            tank: -1,
            suffix: " HP".to_string(),
        })
    }

    fn count_slot(&self, side: usize, count: usize) -> ScoreboardSlot {
        let side = &self.sides[side];
        ScoreboardSlot {
            color: side.color,
            name: side.name.to_string(),
            score: count as f32,
            tank: -1,
            suffix: " players".to_string(),
        }
    }

    fn invincibility_slot(&self, tick_rate: u32) -> ScoreboardSlot {
        let seconds = self.invincibility_left as f32 / tick_rate as f32;
        let (score, suffix) = if seconds > 60.0 {
            ((seconds / 60.0).round(), " min")
        } else {
            (seconds.round(), " sec")
        };
        ScoreboardSlot {
            color: Color::MaxColors,
            name: "Invincibility".to_string(),
            score,
            tank: -1,
            suffix: suffix.to_string(),
        }
    }

    /// Counted players of a fallen side keep scoring and stay fully visible
    fn reward(&self, state: &mut GameState, players: &[&ActivePlayer]) -> Result<(), EntityError> {
        for player in players {
            let view = state.store.get_mut(player.camera)?.camera_mut()?;
            let level = view.level().max(1) as f32;
            view.set_score(view.score() + PASSIVE_SCORE / level);
            state.store.get_mut(player.tank)?.style_mut()?.set_opacity(1.0);
        }
        Ok(())
    }

    /// Rank two rows; the red row stays on top unless blue is strictly ahead
    fn write_ranked(
        state: &mut GameState,
        first: usize,
        red: ScoreboardSlot,
        blue: ScoreboardSlot,
    ) -> Result<(), EntityError> {
        let (top, bottom) = if blue.score > red.score { (blue, red) } else { (red, blue) };
        write_slot(state, first, top)?;
        write_slot(state, first + 1, bottom)
    }
}

impl Default for NexusMode {
    fn default() -> Self {
        Self::new()
    }
}

impl Gamemode for NexusMode {
    fn name(&self) -> &'static str {
        "nexus"
    }

    fn setup(&mut self, state: &mut GameState) -> Result<(), EntityError> {
        state.arena.update_bounds(&mut state.store, ARENA_SIZE, ARENA_SIZE)?;

        let edge = ARENA_SIZE / 2.0 - BASE_SIZE / 2.0;
        let red = Self::create_side(state, "RED", Color::TeamRed, (-edge, -edge), (0.0, -edge))?;
        let blue = Self::create_side(state, "BLUE", Color::TeamBlue, (edge, edge), (0.0, edge))?;
        self.sides = vec![red, blue];

        self.invincibility_left = state.settings.tick_rate as u64 * 60 * INVINCIBILITY_MINUTES as u64;
        state.jobs.schedule_in(
            state.tick,
            self.invincibility_left,
            Job::Broadcast {
                message: "The Nexuses are no longer invincible!".to_string(),
                color: 0xFFFFFF,
                duration_ms: 10_000.0,
            },
        );

        info!(
            "Nexus arena ready ({}x{}, invincible for {} ticks)",
            ARENA_SIZE, ARENA_SIZE, self.invincibility_left
        );
        Ok(())
    }

    fn tick(&mut self, state: &mut GameState) -> Result<(), EntityError> {
        let invincible = self.invincibility_left > 0;
        self.invincibility_left = self.invincibility_left.saturating_sub(1);
        for side in &self.sides {
            if state.store.exists(side.nexus) {
                set_invincible(&mut state.store, side.nexus, invincible)?;
            }
        }
        Ok(())
    }

    fn spawn_player(
        &mut self,
        state: &mut GameState,
        connection: ConnectionId,
        tank: EntityHandle,
    ) -> Result<(), EntityError> {
        if self.sides.len() != 2 {
            return Ok(());
        }
        let side = self.assign_side(state, connection);
        self.assignments.insert(connection, side);
        let camera = state.camera_of(connection);

        let Side {
            name,
            color,
            team,
            spawn_base,
            nexus,
            ..
        } = self.sides[side].clone();

        if !state.store.exists(nexus) {
            debug!("Connection {} joins fallen team {} as spectator", connection, name);
            let entity = state.store.get_mut(tank)?;
            entity.physics_mut()?.set_sides(0);
            let position = entity.position_mut()?;
            position.set_x(0.0);
            position.set_y(0.0);
            if let Some(camera) = camera {
                let view = state.store.get_mut(camera)?.camera_mut()?;
                view.set_tank(SPECTATOR_TANK);
                view.set_respawn_level(0);
            }
            return Ok(());
        }

        let base = state.store.get(spawn_base)?.position()?;
        let (bx, by) = (base.x(), base.y());
        let x = bx + (self.rng.gen::<f32>() - 0.5) * BASE_SIZE;
        let y = by + (self.rng.gen::<f32>() - 0.5) * BASE_SIZE;

        let entity = state.store.get_mut(tank)?;
        entity.relations_mut()?.set_team(Some(team));
        entity.style_mut()?.set_color(color);
        let position = entity.position_mut()?;
        position.set_x(x);
        position.set_y(y);
        if let Some(camera) = camera {
            state.store.get_mut(camera)?.relations_mut()?.set_team(Some(team));
        }
        debug!("Connection {} spawned on team {}", connection, name);
        Ok(())
    }

    fn update_scoreboard(&mut self, state: &mut GameState) -> Result<Verdict, EntityError> {
        if self.sides.len() != 2 {
            return Ok(Verdict::Continue);
        }

        let red_alive = state.store.exists(self.sides[RED].nexus);
        let blue_alive = state.store.exists(self.sides[BLUE].nexus);
        let invincible = self.invincibility_left > 0;

        if !invincible && (!red_alive || !blue_alive) && self.damage_multiplier < END_PHASE_DAMAGE_MULTIPLIER {
            self.damage_multiplier = END_PHASE_DAMAGE_MULTIPLIER;
            info!("Nexus damage multiplier raised to {}", self.damage_multiplier);
            state.broadcast(
                "From now on attacking a Nexus deals double the damage!",
                0x0000FF,
                10_000.0,
                Some("phase_transition"),
            );
        }

        write_leader(state, None)?;

        let first = if invincible { 1 } else { 0 };
        if invincible {
            let slot = self.invincibility_slot(state.settings.tick_rate);
            write_slot(state, 0, slot)?;
        }

        let players = active_players(state);
        let red_players = self.players_on(&players, RED);
        let blue_players = self.players_on(&players, BLUE);

        // A team is only beaten once its nexus is gone
        let verdict = match (red_alive, blue_alive) {
            (true, true) => {
                let red_slot = self.nexus_slot(state, RED)?;
                let blue_slot = self.nexus_slot(state, BLUE)?;
                Self::write_ranked(state, first, red_slot, blue_slot)?;
                Verdict::Continue
            }
            (true, false) | (false, true) => {
                let (fallen, standing, counted) = if red_alive {
                    (BLUE, RED, &blue_players)
                } else {
                    (RED, BLUE, &red_players)
                };
                if let Some(leader) = pick_leader(counted.iter().copied()) {
                    write_leader(state, Some((leader.x, leader.y)))?;
                }
                self.reward(state, counted)?;

                let standing_slot = self.nexus_slot(state, standing)?;
                let fallen_slot = self.count_slot(fallen, counted.len());
                write_slot(state, first, standing_slot)?;
                write_slot(state, first + 1, fallen_slot)?;

                if counted.is_empty() {
                    Verdict::Close {
                        winner: Some(self.sides[standing].winner()),
                    }
                } else {
                    Verdict::Continue
                }
            }
            (false, false) => {
                let mut counted: Vec<&ActivePlayer> = red_players.iter().chain(blue_players.iter()).copied().collect();
                counted.sort_by_key(|p| p.connection);
                if let Some(leader) = pick_leader(counted.iter().copied()) {
                    write_leader(state, Some((leader.x, leader.y)))?;
                }
                self.reward(state, &counted)?;

                let red_slot = self.count_slot(RED, red_players.len());
                let blue_slot = self.count_slot(BLUE, blue_players.len());
                Self::write_ranked(state, first, red_slot, blue_slot)?;

                if blue_players.is_empty() {
                    Verdict::Close {
                        winner: Some(self.sides[RED].winner()),
                    }
                } else if red_players.is_empty() {
                    Verdict::Close {
                        winner: Some(self.sides[BLUE].winner()),
                    }
                } else {
                    Verdict::Continue
                }
            }
        };

        set_scoreboard_amount(state, if invincible { 3 } else { 2 })?;
        Ok(verdict)
    }

    fn on_disconnect(&mut self, _state: &mut GameState, connection: ConnectionId) {
        self.assignments.remove(&connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::{self, ArenaState};
    use crate::game::state::WorldSettings;
    use crate::game::systems::spawn::spawn_tank;
    use crate::net::camera::Camera;
    use crate::net::connection::Connection;

    fn world() -> (GameState, NexusMode) {
        let mut state = GameState::new(WorldSettings::default()).unwrap();
        let mut mode = NexusMode::with_seed(7);
        mode.setup(&mut state).unwrap();
        (state, mode)
    }

    fn join(state: &mut GameState, mode: &mut NexusMode, id: ConnectionId) -> EntityHandle {
        let camera = Camera::create(&mut state.store).unwrap();
        let camera_entity = camera.entity();
        state.connections.insert(id, Connection::new(id, camera));
        let tank = spawn_tank(state, camera_entity, "p").unwrap();
        mode.spawn_player(state, id, tank).unwrap();
        tank
    }

    fn team_of(state: &GameState, tank: EntityHandle) -> Option<EntityHandle> {
        state.store.get(tank).unwrap().relations().unwrap().team()
    }

    fn slot(state: &GameState, index: usize) -> ScoreboardSlot {
        let arena = state.store.get(state.arena.entity()).unwrap().arena().unwrap();
        arena.scoreboard_slot(index).clone()
    }

    /// Run the gamemode, arena and entity steps of one tick
    fn step(state: &mut GameState, mode: &mut NexusMode) {
        mode.tick(state).unwrap();
        arena::tick(state, mode).unwrap();
        state.store.tick_entities(state.tick);
        state.store.reap();
        state.store.wipe_dirty();
        state.tick += 1;
    }

    fn end_invincibility(state: &mut GameState, mode: &mut NexusMode) {
        mode.invincibility_left = 0;
        step(state, mode);
    }

    #[test]
    fn test_setup_layout() {
        let (state, mode) = world();
        let bounds = state.arena.bounds(&state.store).unwrap();
        assert_eq!(bounds.width(), ARENA_SIZE);

        let nexus = state.store.get(mode.red_nexus().unwrap()).unwrap();
        assert_eq!(nexus.health().unwrap().health(), NEXUS_HEALTH);
        assert_eq!(nexus.physics().unwrap().size(), NEXUS_SIZE);
        assert_eq!(mode.invincibility_left(), 25 * 60 * 5);

        let team = state.store.get(mode.red_team().unwrap()).unwrap();
        assert!(team.is_global());
        assert_eq!(team.team().unwrap().mothership(), mode.red_nexus());
    }

    #[test]
    fn test_nexus_invincible_then_vulnerable() {
        let (mut state, mut mode) = world();
        let nexus = mode.red_nexus().unwrap();
        step(&mut state, &mut mode);
        assert_eq!(mode.damage_nexus(&mut state, nexus, 500.0).unwrap(), 0.0);

        end_invincibility(&mut state, &mut mode);
        assert_eq!(mode.damage_nexus(&mut state, nexus, 500.0).unwrap(), 500.0);
    }

    #[test]
    fn test_teams_balance() {
        let (mut state, mut mode) = world();
        let a = join(&mut state, &mut mode, 1);
        let b = join(&mut state, &mut mode, 2);
        let c = join(&mut state, &mut mode, 3);
        let d = join(&mut state, &mut mode, 4);

        let red = mode.red_team();
        let reds = [a, b, c, d].iter().filter(|t| team_of(&state, **t) == red).count();
        assert_eq!(reds, 2);
    }

    #[test]
    fn test_team_is_sticky() {
        let (mut state, mut mode) = world();
        let first = join(&mut state, &mut mode, 1);
        let team = team_of(&state, first);

        state.store.delete(first);
        let camera = state.camera_of(1).unwrap();
        let again = spawn_tank(&mut state, camera, "p").unwrap();
        mode.spawn_player(&mut state, 1, again).unwrap();
        assert_eq!(team_of(&state, again), team);
    }

    #[test]
    fn test_spawn_inside_own_base() {
        let (mut state, mut mode) = world();
        let tank = join(&mut state, &mut mode, 1);
        let side = if team_of(&state, tank) == mode.red_team() { RED } else { BLUE };
        let base = state.store.get(mode.sides[side].spawn_base).unwrap().position().unwrap().clone();
        let position = state.store.get(tank).unwrap().position().unwrap();
        assert!((position.x() - base.x()).abs() <= BASE_SIZE / 2.0);
        assert!((position.y() - base.y()).abs() <= BASE_SIZE / 2.0);
    }

    #[test]
    fn test_joins_surviving_team_when_a_nexus_falls() {
        let (mut state, mut mode) = world();
        state.store.delete(mode.red_nexus().unwrap());
        for id in 1..=3 {
            let tank = join(&mut state, &mut mode, id);
            assert_eq!(team_of(&state, tank), mode.blue_team());
        }
    }

    #[test]
    fn test_sticky_member_of_fallen_team_becomes_spectator() {
        let (mut state, mut mode) = world();
        let tank = join(&mut state, &mut mode, 1);
        let side = if team_of(&state, tank) == mode.red_team() { RED } else { BLUE };
        state.store.delete(mode.sides[side].nexus);
        state.store.delete(tank);

        let camera = state.camera_of(1).unwrap();
        let again = spawn_tank(&mut state, camera, "p").unwrap();
        mode.spawn_player(&mut state, 1, again).unwrap();

        let entity = state.store.get(again).unwrap();
        assert_eq!(entity.physics().unwrap().sides(), 0);
        assert_eq!(entity.position().unwrap().x(), 0.0);
        let view = state.store.get(camera).unwrap().camera().unwrap();
        assert_eq!(view.tank(), SPECTATOR_TANK);
        assert_eq!(view.respawn_level(), 0);
    }

    #[test]
    fn test_scoreboard_while_invincible() {
        let (mut state, mut mode) = world();
        step(&mut state, &mut mode);

        let invincibility = slot(&state, 0);
        assert_eq!(invincibility.name, "Invincibility");
        assert_eq!(invincibility.color, Color::MaxColors);
        assert_eq!(invincibility.suffix, " min");
        assert_eq!(invincibility.score, 5.0);

        // Equal health: red is listed first
        assert_eq!(slot(&state, 1).name, "RED Nexus");
        assert_eq!(slot(&state, 1).suffix, " HP");
        assert_eq!(slot(&state, 2).name, "BLUE Nexus");
        let arena = state.store.get(state.arena.entity()).unwrap().arena().unwrap();
        assert_eq!(arena.scoreboard_amount(), 3);
    }

    #[test]
    fn test_invincibility_counts_seconds_at_the_end() {
        let (mut state, mut mode) = world();
        mode.invincibility_left = 25 * 30 + 1;
        step(&mut state, &mut mode);
        assert_eq!(slot(&state, 0).suffix, " sec");
        assert_eq!(slot(&state, 0).score, 30.0);
    }

    #[test]
    fn test_healthier_nexus_ranks_first() {
        let (mut state, mut mode) = world();
        end_invincibility(&mut state, &mut mode);
        let red = mode.red_nexus().unwrap();
        mode.damage_nexus(&mut state, red, 10.0).unwrap();
        step(&mut state, &mut mode);

        assert_eq!(slot(&state, 0).name, "BLUE Nexus");
        assert_eq!(slot(&state, 1).score, NEXUS_HEALTH - 10.0);
        let arena = state.store.get(state.arena.entity()).unwrap().arena().unwrap();
        assert_eq!(arena.scoreboard_amount(), 2);
    }

    #[test]
    fn test_no_players_yet_does_not_close() {
        let (mut state, mut mode) = world();
        for _ in 0..10 {
            step(&mut state, &mut mode);
        }
        assert_eq!(state.arena.state(), ArenaState::Open);
    }

    #[test]
    fn test_team_wiped_out_with_both_nexuses_standing_stays_open() {
        let (mut state, mut mode) = world();
        let tanks: Vec<EntityHandle> = (1..=4).map(|id| join(&mut state, &mut mode, id)).collect();
        step(&mut state, &mut mode);

        let red = mode.red_team();
        let red_tanks: Vec<EntityHandle> =
            tanks.iter().copied().filter(|t| team_of(&state, *t) == red).collect();
        for tank in red_tanks {
            state.store.delete(tank);
        }
        for _ in 0..3 {
            step(&mut state, &mut mode);
        }
        assert_eq!(state.arena.state(), ArenaState::Open);

        // Same once invincibility is over
        end_invincibility(&mut state, &mut mode);
        step(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Open);
        assert_eq!(slot(&state, 0).suffix, " HP");
    }

    #[test]
    fn test_both_nexuses_down_empty_team_loses() {
        let (mut state, mut mode) = world();
        end_invincibility(&mut state, &mut mode);
        let first = join(&mut state, &mut mode, 1);
        let second = join(&mut state, &mut mode, 2);
        let red_tank = if team_of(&state, first) == mode.red_team() { first } else { second };

        state.store.delete(mode.red_nexus().unwrap());
        state.store.delete(mode.blue_nexus().unwrap());
        step(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Open);
        assert_eq!(slot(&state, 0).suffix, " players");

        state.store.delete(red_tank);
        step(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Closing);
    }

    #[test]
    fn test_nexus_destroyed_scenario() {
        let (mut state, mut mode) = world();
        end_invincibility(&mut state, &mut mode);

        let first = join(&mut state, &mut mode, 1);
        let second = join(&mut state, &mut mode, 2);
        let (red_tank, blue_tank) = if team_of(&state, first) == mode.red_team() {
            (first, second)
        } else {
            (second, first)
        };

        // Red nexus falls while a red player is still alive
        let red_nexus = mode.red_nexus().unwrap();
        mode.damage_nexus(&mut state, red_nexus, NEXUS_HEALTH).unwrap();
        step(&mut state, &mut mode);
        assert!(!state.store.exists(red_nexus));

        for _ in 0..3 {
            step(&mut state, &mut mode);
            assert_eq!(state.arena.state(), ArenaState::Open);
        }
        assert_eq!(slot(&state, 1).suffix, " players");
        assert_eq!(slot(&state, 1).score, 1.0);
        assert_eq!(mode.damage_multiplier(), END_PHASE_DAMAGE_MULTIPLIER);

        // Leader arrow points at the last red player, who keeps scoring
        let arena = state.store.get(state.arena.entity()).unwrap().arena().unwrap();
        assert_ne!(arena.flags() & crate::game::fields::ARENA_FLAG_SHOWS_LEADER_ARROW, 0);
        let camera = state.camera_of(if red_tank == first { 1 } else { 2 }).unwrap();
        assert!(state.store.get(camera).unwrap().camera().unwrap().score() > 0.0);

        // The last red player dies and the blue player leaves the arena
        state.store.delete(red_tank);
        state.store.delete(blue_tank);
        step(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Closing);
        assert!(state.jobs.drain_due(u64::MAX - 1).iter().all(|j| *j != Job::EndMatch));

        step(&mut state, &mut mode);
        assert_eq!(state.arena.state(), ArenaState::Closed);
        for _ in 0..5 {
            step(&mut state, &mut mode);
        }
        assert_eq!(state.arena.state(), ArenaState::Closed);
        let jobs = state.jobs.drain_due(u64::MAX - 1);
        assert_eq!(jobs.iter().filter(|j| **j == Job::EndMatch).count(), 1);
    }

    #[test]
    fn test_double_damage_announced_once() {
        let (mut state, mut mode) = world();
        let camera = Camera::create(&mut state.store).unwrap();
        state.connections.insert(9, Connection::new(9, camera));
        end_invincibility(&mut state, &mut mode);
        state.store.delete(mode.blue_nexus().unwrap());

        for _ in 0..5 {
            step(&mut state, &mut mode);
        }
        let notices = state
            .connections
            .get_mut(&9)
            .unwrap()
            .take_outbox()
            .into_iter()
            .filter(|m| {
                matches!(m, crate::net::protocol::ServerMessage::Notification { tag: Some(t), .. } if t == "phase_transition")
            })
            .count();
        assert_eq!(notices, 1);
    }
}
