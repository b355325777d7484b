use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::game::constants::{arena, net, store, tick};
use crate::game::game_loop::GameLoopConfig;
use crate::game::state::WorldSettings;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Simulation rate in Hz
    pub tick_rate: u32,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Largest accepted frame payload in bytes
    pub max_message_size: usize,
    /// Entity store capacity
    pub max_entities: usize,
    /// Seconds between the arena closing and the match ending
    pub close_delay_secs: u32,
    /// Gamemode name (`nexus` or `sandbox`)
    pub gamemode: String,
}

/// Rejected configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Port cannot be 0")]
    ZeroPort,
    #[error("Tick rate must be 1-240 Hz, got {0}")]
    TickRate(u32),
    #[error("max_connections must be at least 1")]
    NoConnections,
    #[error("max_entities must be 1-{limit}, got {value}")]
    MaxEntities { value: usize, limit: usize },
    #[error("max_message_size must be at least 64 bytes, got {0}")]
    MessageSize(usize),
    #[error("Unknown gamemode '{0}'")]
    UnknownGamemode(String),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: net::DEFAULT_PORT,
            tick_rate: tick::TICK_RATE,
            max_connections: net::MAX_CONNECTIONS,
            max_message_size: net::MAX_MESSAGE_SIZE,
            max_entities: store::MAX_ENTITIES,
            close_delay_secs: arena::CLOSE_DELAY_SECS,
            gamemode: "nexus".to_string(),
        }
    }
}

/// Parse `key` from the environment into `target` when present and accepted
fn read_env<T: FromStr>(key: &str, target: &mut T, accept: impl Fn(&T) -> bool) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(parsed) if accept(&parsed) => *target = parsed,
        Ok(_) => tracing::warn!("{} '{}' out of range, using default", key, raw),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        read_env("BIND_ADDRESS", &mut config.bind_address, |_| true);
        read_env("PORT", &mut config.port, |p| *p > 0);
        read_env("TICK_RATE", &mut config.tick_rate, |r| (1..=240).contains(r));
        read_env("MAX_CONNECTIONS", &mut config.max_connections, |c| *c > 0);
        read_env("MAX_MESSAGE_SIZE", &mut config.max_message_size, |s| *s >= 64);
        read_env("MAX_ENTITIES", &mut config.max_entities, |e| {
            (1..=store::MAX_ENTITIES).contains(e)
        });
        read_env("CLOSE_DELAY_SECS", &mut config.close_delay_secs, |_| true);

        if let Ok(mode) = std::env::var("GAMEMODE") {
            config.gamemode = mode.to_lowercase();
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if !(1..=240).contains(&self.tick_rate) {
            return Err(ConfigError::TickRate(self.tick_rate));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        if self.max_entities == 0 || self.max_entities > store::MAX_ENTITIES {
            return Err(ConfigError::MaxEntities {
                value: self.max_entities,
                limit: store::MAX_ENTITIES,
            });
        }
        if self.max_message_size < 64 {
            return Err(ConfigError::MessageSize(self.max_message_size));
        }
        if !matches!(self.gamemode.as_str(), "nexus" | "sandbox") {
            return Err(ConfigError::UnknownGamemode(self.gamemode.clone()));
        }
        Ok(())
    }

    /// Settings handed to the simulation
    pub fn world(&self) -> WorldSettings {
        WorldSettings {
            tick_rate: self.tick_rate,
            max_entities: self.max_entities,
            close_delay_secs: self.close_delay_secs,
        }
    }

    pub fn game_loop(&self) -> GameLoopConfig {
        GameLoopConfig {
            world: self.world(),
            ..Default::default()
        }
    }
}
