use serde::{Deserialize, Serialize};

/// Tick timing
pub mod tick {
    /// Default server tick rate in Hz
    pub const TICK_RATE: u32 = 25;
}

/// Network limits
pub mod net {
    /// Default listen port
    pub const DEFAULT_PORT: u16 = 4433;
    /// Largest accepted frame payload in bytes
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Default cap on concurrent connections
    pub const MAX_CONNECTIONS: usize = 256;
    /// Outbound frames buffered per connection before it is dropped as too slow
    pub const OUTBOUND_QUEUE: usize = 256;
}

/// Entity store limits
pub mod store {
    /// Maximum number of simultaneously alive entities (ids are u16 on the wire)
    pub const MAX_ENTITIES: usize = 16384;
}

/// Camera / viewport constants
pub mod view {
    /// Reference screen width at fov = 1.0
    pub const SCREEN_WIDTH: f32 = 1920.0;
    /// Reference screen height at fov = 1.0
    pub const SCREEN_HEIGHT: f32 = 1080.0;
    /// Lower clamp on fov so a zero fov cannot produce an infinite viewport
    pub const MIN_FOV: f32 = 0.01;
}

/// Arena constants
pub mod arena {
    /// Space outside the bounds an entity may still occupy
    pub const ARENA_PADDING: f32 = 200.0;
    /// Default delay between CLOSED and match teardown, in seconds
    pub const CLOSE_DELAY_SECS: u32 = 5;
    /// Health drained from every player tank per tick while the arena closes
    pub const CLOSER_DAMAGE: f32 = 10.0;
}

/// Player tank defaults
pub mod player {
    /// Tank body radius
    pub const SIZE: f32 = 50.0;
    /// Movement speed in world units per tick
    pub const SPEED: f32 = 10.0;
    /// Starting health
    pub const HEALTH: f32 = 50.0;
    /// Tank marker used for spectators
    pub const SPECTATOR_TANK: i32 = -1;
}

/// Nexus gamemode layout
pub mod nexus {
    pub const ARENA_SIZE: f32 = 16000.0;
    pub const BASE_SIZE: f32 = ARENA_SIZE / 8.0;
    pub const NEXUS_HEALTH: f32 = 100_000.0;
    pub const NEXUS_SIZE: f32 = 150.0;
    pub const INVINCIBILITY_MINUTES: u32 = 5;
    /// Passive score each alive player gains per tick, divided by level
    pub const PASSIVE_SCORE: f32 = 450.0;
    /// Damage multiplier applied to nexuses once the end phase begins
    pub const END_PHASE_DAMAGE_MULTIPLIER: f32 = 2.0;
}

/// Free-for-all sandbox layout
pub mod sandbox {
    pub const ARENA_SIZE: f32 = 8000.0;
}

/// Number of rows in the arena scoreboard table
pub const SCOREBOARD_SLOTS: usize = 10;

/// Palette indices understood by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Color {
    Border = 0,
    Barrel = 1,
    Tank = 2,
    TeamBlue = 3,
    TeamRed = 4,
    TeamPurple = 5,
    TeamGreen = 6,
    Shiny = 7,
    Neutral = 12,
    ScoreboardBar = 13,
    EnemyTank = 15,
    Fallen = 17,
    /// Sentinel rendered as a rainbow bar on the scoreboard
    MaxColors = 18,
}

impl Color {
    /// RGB hex code used for notification text
    pub const fn hex(self) -> u32 {
        match self {
            Color::Border => 0x555555,
            Color::Barrel => 0x999999,
            Color::Tank => 0x00B2E1,
            Color::TeamBlue => 0x00B2E1,
            Color::TeamRed => 0xF14E54,
            Color::TeamPurple => 0xBF7FF5,
            Color::TeamGreen => 0x00E16E,
            Color::Shiny => 0x8AFF69,
            Color::Neutral => 0xFFE869,
            Color::ScoreboardBar => 0x43FF91,
            Color::EnemyTank => 0xF14E54,
            Color::Fallen => 0xC0C0C0,
            Color::MaxColors => 0x000000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_size_is_eighth_of_arena() {
        assert_eq!(nexus::BASE_SIZE * 8.0, nexus::ARENA_SIZE);
    }

    #[test]
    fn test_team_colors_distinct() {
        assert_ne!(Color::TeamRed.hex(), Color::TeamBlue.hex());
    }
}
