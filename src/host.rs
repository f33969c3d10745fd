//! Transport abstraction and an in-process double for tests and demos.
//!
//! `Host` is deliberately thin: everything this crate does with a connection
//! is "open a byte stream to a peer" and "be told about a stream someone
//! opened to us." Dialing, NAT traversal, and stream multiplexing are a real
//! transport's problem, not the router's.

use crate::error::TransportError;
use crate::types::PeerId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;

pub type Reader = ReadHalf<tokio::io::DuplexStream>;
pub type Writer = WriteHalf<tokio::io::DuplexStream>;

/// A stream opened to us by `peer`, delivered to the event loop's accept
/// queue.
pub struct Incoming {
    pub peer: PeerId,
    pub reader: Reader,
    pub writer: Writer,
}

/// What the event loop needs from a transport: dial out, and be told about
/// inbound streams. A real transport (libp2p swarm, raw TCP listener) would
/// implement this over its own stream type instead of `tokio::io::duplex`.
pub trait Host: Send + Sync {
    fn open_stream(&self, to: &PeerId) -> Result<(Reader, Writer), TransportError>;
}

/// In-process transport double: every registered peer gets an `mpsc`
/// channel of `Incoming` connections; `open_stream` creates a
/// `tokio::io::duplex` pair and delivers one half to the target's channel.
/// Used by `tests/scenarios.rs` and `demos/sim_node.rs` so neither needs a
/// real socket.
#[derive(Clone)]
pub struct LoopbackHost {
    self_id: PeerId,
    registry: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Incoming>>>>,
    buffer_size: usize,
}

impl LoopbackHost {
    /// Register `self_id` against a shared `registry` (construct one with
    /// [`LoopbackHost::new_registry`] and pass it to every participant) and
    /// return the receiver the event loop polls for inbound connections.
    pub fn register(
        self_id: PeerId,
        registry: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Incoming>>>>,
        buffer_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Incoming>) {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.lock().unwrap().insert(self_id.clone(), tx);
        (
            Self {
                self_id,
                registry,
                buffer_size,
            },
            rx,
        )
    }

    pub fn new_registry() -> Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Incoming>>>> {
        Arc::new(Mutex::new(HashMap::new()))
    }
}

impl Host for LoopbackHost {
    fn open_stream(&self, to: &PeerId) -> Result<(Reader, Writer), TransportError> {
        let sender = {
            let registry = self.registry.lock().unwrap();
            registry.get(to).cloned()
        };
        let Some(sender) = sender else {
            return Err(TransportError::OpenStreamFailed {
                peer: to.to_string(),
                reason: "peer not registered with this loopback network".into(),
            });
        };
        let (local, remote) = tokio::io::duplex(self.buffer_size);
        let (local_r, local_w) = tokio::io::split(local);
        let (remote_r, remote_w) = tokio::io::split(remote);
        sender
            .send(Incoming {
                peer: self.self_id.clone(),
                reader: remote_r,
                writer: remote_w,
            })
            .map_err(|_| TransportError::OpenStreamFailed {
                peer: to.to_string(),
                reason: "peer's accept queue is closed".into(),
            })?;
        Ok((local_r, local_w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_stream_delivers_an_incoming_to_the_target() {
        let registry = LoopbackHost::new_registry();
        let (_b, mut b_rx) = LoopbackHost::register(PeerId(vec![2]), registry.clone(), 4096);
        let (a, _a_rx) = LoopbackHost::register(PeerId(vec![3]), registry.clone(), 4096);
        let _ = a.open_stream(&PeerId(vec![2])).unwrap();
        let incoming = b_rx.recv().await.unwrap();
        assert_eq!(incoming.peer, PeerId(vec![3]));
    }

    #[tokio::test]
    async fn open_stream_to_unregistered_peer_fails() {
        let registry = LoopbackHost::new_registry();
        let (a, _rx) = LoopbackHost::register(PeerId(vec![1]), registry, 4096);
        assert!(a.open_stream(&PeerId(vec![99])).is_err());
    }
}
