//! Live connections keyed by client id.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Instruction for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Pong(Vec<u8>),
    /// Send a close frame and stop writing.
    Close,
}

pub struct ConnectionRegistry {
    peers: RwLock<HashMap<String, mpsc::Sender<Outbound>>>,
    buffer: usize,
}

impl ConnectionRegistry {
    /// `buffer` bounds the outbound queue of each connection.
    pub fn new(buffer: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Add a connection under a fresh id. The receiver feeds its writer task.
    pub fn register(&self) -> (String, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut peers = self.peers.write();
        let mut id = uuid::Uuid::new_v4().to_string();
        while peers.contains_key(&id) {
            id = uuid::Uuid::new_v4().to_string();
        }
        peers.insert(id.clone(), tx);
        tracing::info!("Client {} registered ({} connected)", id, peers.len());
        (id, rx)
    }

    /// Drop a connection and ask its writer to close. Safe to call repeatedly.
    pub fn remove(&self, client_id: &str) -> bool {
        let Some(tx) = self.peers.write().remove(client_id) else {
            return false;
        };
        // A full or closed queue means the writer is already gone or stuck;
        // dropping the sender ends it either way.
        let _ = tx.try_send(Outbound::Close);
        tracing::info!("Client {} removed", client_id);
        true
    }

    /// Queue handle for frames the connection itself must send (pongs).
    pub fn sender(&self, client_id: &str) -> Option<mpsc::Sender<Outbound>> {
        self.peers.read().get(client_id).cloned()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.peers.read().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    /// Queue `text` for one client. False if the client is unknown, gone or
    /// not draining its queue.
    pub fn send_to(&self, client_id: &str, text: String) -> bool {
        match self.sender(client_id) {
            Some(tx) => deliver(client_id, &tx, text),
            None => {
                tracing::warn!("Client {} not found", client_id);
                false
            }
        }
    }

    /// Queue `text` for every client except `sender`. Returns how many accepted it.
    ///
    /// Never waits: a peer whose queue is full misses this message.
    pub fn broadcast_except(&self, sender: &str, text: &str) -> usize {
        let targets: Vec<(String, mpsc::Sender<Outbound>)> = self
            .peers
            .read()
            .iter()
            .filter(|(id, _)| id.as_str() != sender)
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect();

        targets
            .iter()
            .filter(|(id, tx)| deliver(id, tx, text.to_string()))
            .count()
    }
}

fn deliver(client_id: &str, tx: &mpsc::Sender<Outbound>, text: String) -> bool {
    match tx.try_send(Outbound::Text(text)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!("Dropping message for {}: outbound queue full", client_id);
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::warn!("Dropping message for {}: connection closed", client_id);
            false
        }
    }
}
