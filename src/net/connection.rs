use crate::net::camera::Camera;
use crate::net::protocol::{PlayerInput, ServerMessage};

/// Sequential connection identifier assigned by the transport
pub type ConnectionId = u64;

/// Simulation-side view of one client connection
///
/// Owned by the tick loop. The network task that produced it only ever
/// reports events; it never holds a reference to this struct.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    pub camera: Camera,
    /// Latest input; replaced wholesale by every input message
    pub input: PlayerInput,
    /// Name to spawn with on the next step, if a spawn was requested
    pub spawn_request: Option<String>,
    /// Set on disconnect or leave, reconciled at the start of the next tick
    pub terminated: bool,
    outbox: Vec<ServerMessage>,
}

impl Connection {
    pub fn new(id: ConnectionId, camera: Camera) -> Self {
        Self {
            id,
            name: String::new(),
            camera,
            input: PlayerInput::default(),
            spawn_request: None,
            terminated: false,
            outbox: Vec::new(),
        }
    }

    /// Queue a text popup for this client
    pub fn notify(&mut self, message: impl Into<String>, color: u32, duration_ms: f32, tag: Option<&str>) {
        self.outbox.push(ServerMessage::Notification {
            message: message.into(),
            color,
            duration_ms,
            tag: tag.map(str::to_string),
        });
    }

    /// Queue any other message to go out with this tick's update
    pub fn send(&mut self, message: ServerMessage) {
        self.outbox.push(message);
    }

    /// Take every queued message
    pub fn take_outbox(&mut self) -> Vec<ServerMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending_messages(&self) -> usize {
        self.outbox.len()
    }
}
