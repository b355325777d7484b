pub mod protocol;
pub mod framing;
pub mod camera;
pub mod connection;
pub mod transport;
pub mod game_session;
