//! Concrete gamemodes

pub mod nexus;
pub mod sandbox;

use crate::game::gamemode::Gamemode;

pub use nexus::NexusMode;
pub use sandbox::SandboxMode;

/// Build a gamemode by its configuration name
pub fn by_name(name: &str) -> Option<Box<dyn Gamemode>> {
    match name {
        "nexus" => Some(Box::new(NexusMode::new())),
        "sandbox" => Some(Box::new(SandboxMode::new())),
        _ => None,
    }
}
