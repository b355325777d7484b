pub mod movement;
pub mod spawn;
pub mod combat;
