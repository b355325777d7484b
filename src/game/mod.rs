pub mod constants;
pub mod fields;
pub mod entity;
pub mod store;
pub mod behavior;
pub mod jobs;
pub mod state;
pub mod arena;
pub mod gamemode;
pub mod modes;
pub mod systems;
pub mod input_buffer;
pub mod game_loop;
pub mod performance;
