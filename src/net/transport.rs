//! TCP transport
//!
//! Accepts connections, turns inbound frames into [`ClientEvent`]s for the
//! tick loop and writes outbound frames from a per-connection channel. No task
//! here touches the world; a bad frame closes only the connection it came on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::game::constants::net::OUTBOUND_QUEUE;
use crate::game::input_buffer::{ClientEvent, InputBufferError, InputSender};
use crate::metrics::Metrics;
use crate::net::connection::ConnectionId;
use crate::net::framing::{frame, read_message, FramingError};
use crate::net::protocol::{decode, encode, ClientMessage, ServerMessage};

/// Outbound frame queues by connection, shared with the session
pub type Writers = Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<Vec<u8>>>>>;

/// Create an empty writer registry
pub fn writers() -> Writers {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Result of queuing a frame for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The client is not draining its socket; the connection should go
    Backlogged,
    /// No writer registered for the connection
    Gone,
}

/// Queue an already framed message without waiting
pub fn deliver(writers: &Writers, connection: ConnectionId, framed: Vec<u8>) -> Delivery {
    let guard = writers.read();
    let Some(tx) = guard.get(&connection) else {
        return Delivery::Gone;
    };
    match tx.try_send(framed) {
        Ok(()) => Delivery::Queued,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Backlogged,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
    }
}

/// Drop the writer of a connection; its socket is shut down once drained
pub fn release(writers: &Writers, connection: ConnectionId) -> bool {
    writers.write().remove(&connection).is_some()
}

/// TCP front end of the arena
pub struct TcpServer {
    config: ServerConfig,
    events: InputSender,
    writers: Writers,
    metrics: Arc<Metrics>,
    next_id: AtomicU64,
}

impl TcpServer {
    pub fn new(config: ServerConfig, events: InputSender, writers: Writers, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            events,
            writers,
            metrics,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
        Ok(listener)
    }

    /// Accept connections until the listener fails
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("Listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            if self.writers.read().len() >= self.config.max_connections {
                self.metrics.connections_rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Connection from {} rejected: server full", peer);
                let max_size = self.config.max_message_size;
                tokio::spawn(reject(stream, max_size));
                continue;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, id).await {
                    debug!("Connection {} ({}) ended: {}", id, peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, id: ConnectionId) -> anyhow::Result<()> {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (closed_tx, closed_rx) = oneshot::channel();

        self.writers.write().insert(id, tx);
        self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.events.try_send(ClientEvent::Connected { connection: id }) {
            release(&self.writers, id);
            self.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
            return Err(anyhow::anyhow!("Tick loop unavailable: {}", e));
        }
        info!("Connection {} opened", id);

        let metrics = self.metrics.clone();
        tokio::spawn(write_loop(writer, rx, closed_tx, metrics, id));

        let result = self.read_loop(reader, id, closed_rx).await;

        release(&self.writers, id);
        self.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
        // Bypasses the message queue, so a flood cannot leak the camera
        let _ = self.events.try_send(ClientEvent::Disconnected { connection: id });
        info!("Connection {} closed", id);

        result
    }

    async fn read_loop(
        &self,
        mut reader: OwnedReadHalf,
        id: ConnectionId,
        mut closed: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        loop {
            let data = tokio::select! {
                read = read_message(&mut reader, self.config.max_message_size) => match read {
                    Ok(data) => data,
                    Err(FramingError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
                _ = &mut closed => return Ok(()),
            };

            self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .bytes_received
                .fetch_add(data.len() as u64 + 4, Ordering::Relaxed);

            let message: ClientMessage = decode(&data)?;
            let event = ClientEvent::Message {
                connection: id,
                message,
            };
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(InputBufferError::Full) => debug!("Input buffer full, dropping message from {}", id),
                Err(InputBufferError::Disconnected) => return Ok(()),
            }
        }
    }
}

/// Drain the outbound queue into the socket until either side goes away
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    closed: oneshot::Sender<()>,
    metrics: Arc<Metrics>,
    id: ConnectionId,
) {
    while let Some(framed) = rx.recv().await {
        if let Err(e) = writer.write_all(&framed).await {
            debug!("Write to connection {} failed: {}", id, e);
            break;
        }
        metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        metrics.bytes_sent.fetch_add(framed.len() as u64, Ordering::Relaxed);
    }
    let _ = writer.shutdown().await;
    let _ = closed.send(());
}

/// Tell a client the server is full and hang up
async fn reject(mut stream: TcpStream, max_size: usize) {
    let message = ServerMessage::Kicked {
        reason: "Server full".to_string(),
    };
    let framed = match encode(&message) {
        Ok(data) => frame(&data, max_size),
        Err(e) => {
            warn!("Failed to encode rejection: {}", e);
            return;
        }
    };
    if let Ok(framed) = framed {
        let _ = stream.write_all(&framed).await;
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input_buffer::InputBuffer;
    use crate::net::framing::write_message;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    const MAX: usize = 1024;

    async fn start(max_connections: usize) -> (SocketAddr, InputBuffer, Writers) {
        start_with_buffer(max_connections, InputBuffer::new(64)).await
    }

    async fn start_with_buffer(max_connections: usize, buffer: InputBuffer) -> (SocketAddr, InputBuffer, Writers) {
        let registry = writers();
        let config = ServerConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            port: 0,
            max_connections,
            max_message_size: MAX,
            ..Default::default()
        };
        let server = Arc::new(TcpServer::new(
            config,
            buffer.sender(),
            registry.clone(),
            Arc::new(Metrics::new()),
        ));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.run(listener));
        (addr, buffer, registry)
    }

    async fn next_events(buffer: &InputBuffer, count: usize) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(buffer.drain());
            if events.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        events
    }

    #[tokio::test]
    async fn test_connect_message_disconnect() {
        let (addr, buffer, registry) = start(8).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let events = next_events(&buffer, 1).await;
        let id = match events.as_slice() {
            [ClientEvent::Connected { connection }] => *connection,
            other => panic!("unexpected events {:?}", other),
        };
        assert!(registry.read().contains_key(&id));

        write_message(&mut client, &encode(&ClientMessage::Ping).unwrap(), MAX)
            .await
            .unwrap();
        let events = next_events(&buffer, 1).await;
        assert_eq!(
            events,
            vec![ClientEvent::Message {
                connection: id,
                message: ClientMessage::Ping
            }]
        );

        drop(client);
        let events = next_events(&buffer, 1).await;
        assert_eq!(events, vec![ClientEvent::Disconnected { connection: id }]);
        assert!(!registry.read().contains_key(&id));
    }

    #[tokio::test]
    async fn test_garbage_closes_only_that_connection() {
        let (addr, buffer, _registry) = start(8).await;
        let mut bad = TcpStream::connect(addr).await.unwrap();
        next_events(&buffer, 1).await;
        let _good = TcpStream::connect(addr).await.unwrap();
        next_events(&buffer, 1).await;

        write_message(&mut bad, &[0xFF; 16], MAX).await.unwrap();
        let events = next_events(&buffer, 1).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ClientEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_outbound_frames_reach_client() {
        let (addr, buffer, registry) = start(8).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let id = next_events(&buffer, 1).await[0].connection();

        let framed = frame(&encode(&ServerMessage::Pong).unwrap(), MAX).unwrap();
        assert_eq!(deliver(&registry, id, framed), Delivery::Queued);
        let data = read_message(&mut client, MAX).await.unwrap();
        assert_eq!(decode::<ServerMessage>(&data).unwrap(), ServerMessage::Pong);

        assert!(release(&registry, id));
        assert_eq!(deliver(&registry, id, Vec::new()), Delivery::Gone);
        // Released writer shuts the socket down
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_connects_and_disconnects_pass_a_flooded_queue() {
        let (addr, buffer, _registry) = start_with_buffer(8, InputBuffer::new(4)).await;
        let flood = buffer.sender();
        while flood
            .try_send(ClientEvent::Message {
                connection: 99,
                message: ClientMessage::Ping,
            })
            .is_ok()
        {}

        // The runtime is single-threaded, so a parked connection task would
        // stall the whole test here
        let first = TcpStream::connect(addr).await.unwrap();
        let second = TcpStream::connect(addr).await.unwrap();
        let events = next_events(&buffer, 6).await;
        let connects = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::Connected { .. }))
            .count();
        assert_eq!(connects, 2);

        while flood
            .try_send(ClientEvent::Message {
                connection: 99,
                message: ClientMessage::Ping,
            })
            .is_ok()
        {}
        drop(first);
        drop(second);
        let events = next_events(&buffer, 6).await;
        let disconnects = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 2);
    }

    #[tokio::test]
    async fn test_rejects_beyond_capacity() {
        let (addr, buffer, _registry) = start(1).await;
        let _first = TcpStream::connect(addr).await.unwrap();
        next_events(&buffer, 1).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let data = read_message(&mut second, MAX).await.unwrap();
        assert!(matches!(decode::<ServerMessage>(&data).unwrap(), ServerMessage::Kicked { .. }));
        assert!(buffer.drain().is_empty());
    }
}
