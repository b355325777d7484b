//! Lock-free event buffer between connection tasks and the tick loop
//!
//! Uses crossbeam-channel for lock-free MPSC communication. Connection tasks
//! never touch entity state; everything they learn becomes a [`ClientEvent`]
//! that the tick loop drains at the start of the next tick.
//!
//! Messages go through a bounded queue and are dropped under backpressure.
//! Connects and disconnects use a separate unbounded queue, at most two
//! events per connection, so a flooded message queue can neither lose them
//! nor make a connection task wait.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use crate::net::connection::ConnectionId;
use crate::net::protocol::ClientMessage;

/// Something a connection task observed since the last tick
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { connection: ConnectionId },
    Message { connection: ConnectionId, message: ClientMessage },
    Disconnected { connection: ConnectionId },
}

impl ClientEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            ClientEvent::Connected { connection }
            | ClientEvent::Message { connection, .. }
            | ClientEvent::Disconnected { connection } => *connection,
        }
    }
}

/// Event queues drained once per tick
pub struct InputBuffer {
    sender: Sender<ClientEvent>,
    receiver: Receiver<ClientEvent>,
    lifecycle_sender: Sender<ClientEvent>,
    lifecycle_receiver: Receiver<ClientEvent>,
    capacity: usize,
}

impl InputBuffer {
    /// Create a new buffer with the given capacity
    ///
    /// Capacity bounds the messages buffered between two ticks.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        let (lifecycle_sender, lifecycle_receiver) = unbounded();
        Self {
            sender,
            receiver,
            lifecycle_sender,
            lifecycle_receiver,
            capacity,
        }
    }

    /// Create a new sender handle for a connection task
    pub fn sender(&self) -> InputSender {
        InputSender {
            sender: self.sender.clone(),
            lifecycle: self.lifecycle_sender.clone(),
        }
    }

    /// Drain all pending events for this tick
    ///
    /// Connects come first and disconnects last, with messages in arrival
    /// order between them. Messages are taken before lifecycle events so
    /// every drained message has its connect in this drain or an earlier one.
    pub fn drain(&self) -> Vec<ClientEvent> {
        let messages: Vec<ClientEvent> = self.receiver.try_iter().collect();
        let (connects, disconnects): (Vec<ClientEvent>, Vec<ClientEvent>) = self
            .lifecycle_receiver
            .try_iter()
            .partition(|e| matches!(e, ClientEvent::Connected { .. }));

        let mut events = connects;
        events.extend(messages);
        events.extend(disconnects);
        events
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len() + self.lifecycle_receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty() && self.lifecycle_receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Clonable sender handle for connection tasks
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<ClientEvent>,
    lifecycle: Sender<ClientEvent>,
}

impl InputSender {
    /// Submit an event without blocking
    ///
    /// Only messages can fail with [`InputBufferError::Full`]; connects and
    /// disconnects are always accepted while the tick loop is alive.
    #[inline]
    pub fn try_send(&self, event: ClientEvent) -> Result<(), InputBufferError> {
        if !matches!(event, ClientEvent::Message { .. }) {
            return self
                .lifecycle
                .send(event)
                .map_err(|_| InputBufferError::Disconnected);
        }
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => InputBufferError::Full,
            TrySendError::Disconnected(_) => InputBufferError::Disconnected,
        })
    }
}

/// Input buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputBufferError {
    /// Buffer is full (backpressure)
    #[error("input buffer full")]
    Full,
    /// Tick loop stopped
    #[error("input buffer disconnected")]
    Disconnected,
}
