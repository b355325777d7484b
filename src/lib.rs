//! Nexus Arena Server Library
//!
//! A fixed-rate arena simulation: an entity store with dirty-tracked field
//! groups, per-connection replication, a deferred job queue and an arena
//! lifecycle driven by pluggable gamemodes, served over length-prefixed TCP.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
