//! Connection registry and fan-out primitives.
//!
//! The hub tracks every live participant by id and role and delivers
//! messages into each connection's outbound queue. Delivery is best-effort
//! and at-most-once: a send to a connection whose forwarding task has died
//! is simply dropped, and the registry is cleaned up when the socket task
//! unregisters.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::Message;

/// Identifies one live connection for its lifetime.
pub type ConnId = u64;

/// What a participant declared itself to be at handshake time. Immutable
/// for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Issues commands and renders UI state; never renders audio.
    Controller,
    /// The single participant that renders audio output.
    Playback,
}

impl Role {
    /// Parses the handshake's `role` value; anything unknown is rejected.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "controller" => Some(Role::Controller),
            "playback" => Some(Role::Playback),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Controller => "controller",
            Role::Playback => "playback",
        })
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    /// Exactly one playback node may be connected at a time.
    #[error("a playback node is already connected")]
    PlaybackRoleTaken,
}

struct Peer {
    role: Role,
    tx: mpsc::UnboundedSender<Message>,
}

/// Registry of live connections.
#[derive(Default)]
pub struct Hub {
    next_id: AtomicU64,
    peers: Mutex<HashMap<ConnId, Peer>>,
}

impl Hub {
    pub fn new() -> Self {
        Hub::default()
    }

    /// Admits a connection, handing back its id and the receiving end of its
    /// outbound queue. A second simultaneous playback registration is
    /// refused so the board never has two audio-rendering endpoints.
    pub fn register(
        &self,
        role: Role,
    ) -> Result<(ConnId, mpsc::UnboundedReceiver<Message>), HubError> {
        let mut peers = self.peers.lock();
        if role == Role::Playback && peers.values().any(|p| p.role == Role::Playback) {
            return Err(HubError::PlaybackRoleTaken);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        peers.insert(id, Peer { role, tx });
        Ok((id, rx))
    }

    pub fn unregister(&self, id: ConnId) {
        self.peers.lock().remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Queues a message for one connection. Dropped silently if the
    /// connection is gone; the socket task cleans up on its way out.
    pub fn send_to(&self, id: ConnId, msg: Message) {
        if let Some(peer) = self.peers.lock().get(&id) {
            let _ = peer.tx.send(msg);
        }
    }

    /// Queues a message for every connection, the sender included.
    pub fn broadcast_all(&self, msg: &Message) {
        for peer in self.peers.lock().values() {
            let _ = peer.tx.send(msg.clone());
        }
    }

    /// Queues a message for every connection except `sender`.
    pub fn broadcast_except(&self, sender: ConnId, msg: &Message) {
        for (id, peer) in self.peers.lock().iter() {
            if *id != sender {
                let _ = peer.tx.send(msg.clone());
            }
        }
    }
}
