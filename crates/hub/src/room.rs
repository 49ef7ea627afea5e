//! One actor per room owns the registry. Connection handlers reach it only
//! through [`RoomHandle`], so every inbound envelope of a room is handled in a
//! single order.

use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::ConnectionId,
    protocol::{self, Baseline, ChainConfig, ClusterConfig, Envelope, RawEnvelope, Registry},
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room `{0}` is no longer running")]
    Closed(String),
    #[error("baseline could not be encoded: {0}")]
    Encode(String),
}

/// What a new connection receives: its baseline and the room feed, taken in
/// the same actor step so nothing is missed or duplicated in between.
pub struct Joined {
    pub baseline: String,
    pub events: broadcast::Receiver<String>,
}

enum RoomCommand {
    Connect {
        conn: ConnectionId,
        reply: oneshot::Sender<Result<Joined, RoomError>>,
    },
    Receive {
        conn: ConnectionId,
        text: String,
    },
    Snapshot {
        reply: oneshot::Sender<Result<String, RoomError>>,
    },
    Disconnect {
        conn: ConnectionId,
    },
}

#[derive(Clone)]
pub struct RoomHandle {
    name: Arc<str>,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn spawn(
        name: impl Into<String>,
        chain: ChainConfig,
        cluster: ClusterConfig,
        capacity: usize,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (events, _) = broadcast::channel(capacity.max(1));
        let room = Room {
            name: Arc::clone(&name),
            registry: Registry::default(),
            chain,
            cluster,
            connections: 0,
            events,
        };
        tokio::spawn(room.run(rx));
        info!(room = %name, "room opened");
        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn closed(&self) -> RoomError {
        RoomError::Closed(self.name.to_string())
    }

    pub async fn connect(&self, conn: ConnectionId) -> Result<Joined, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Connect { conn, reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    pub async fn receive(&self, conn: ConnectionId, text: String) -> Result<(), RoomError> {
        self.tx
            .send(RoomCommand::Receive { conn, text })
            .await
            .map_err(|_| self.closed())
    }

    /// Current baseline envelope as wire text.
    pub async fn snapshot(&self) -> Result<String, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Snapshot { reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        let _ = self.tx.send(RoomCommand::Disconnect { conn }).await;
    }
}

struct Room {
    name: Arc<str>,
    registry: Registry,
    chain: ChainConfig,
    cluster: ClusterConfig,
    connections: usize,
    events: broadcast::Sender<String>,
}

impl Room {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                RoomCommand::Connect { conn, reply } => {
                    let joined = self.baseline().map(|baseline| Joined {
                        baseline,
                        events: self.events.subscribe(),
                    });
                    if joined.is_ok() {
                        self.connections += 1;
                        info!(room = %self.name, %conn, connections = self.connections, "peer connected");
                    }
                    let _ = reply.send(joined);
                }
                RoomCommand::Receive { conn, text } => self.receive(conn, text),
                RoomCommand::Snapshot { reply } => {
                    let _ = reply.send(self.baseline());
                }
                RoomCommand::Disconnect { conn } => {
                    self.connections = self.connections.saturating_sub(1);
                    info!(room = %self.name, %conn, connections = self.connections, "peer disconnected");
                }
            }
        }
        info!(room = %self.name, "room closed");
    }

    fn baseline(&self) -> Result<String, RoomError> {
        Envelope::Baseline(Baseline {
            chain: self.chain.clone(),
            config: self.cluster.clone(),
            peers: self.registry.clone(),
        })
        .to_json()
        .map_err(|err| RoomError::Encode(err.to_string()))
    }

    fn receive(&mut self, conn: ConnectionId, text: String) {
        let raw: RawEnvelope = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(room = %self.name, %conn, error = %err, "dropping malformed envelope");
                return;
            }
        };

        if raw.kind != protocol::REGISTER {
            debug!(room = %self.name, %conn, kind = %raw.kind, "relaying envelope");
            let _ = self.events.send(text);
            return;
        }

        // The connection id is stamped below; a client-supplied value is dropped
        // unread so it can never fail the registration.
        let mut raw = raw;
        if let Some(payload) = raw.payload.as_object_mut() {
            payload.remove("sessionPeerId");
        }

        match Envelope::try_from(raw) {
            Ok(Envelope::Register(mut record)) => {
                record.session_peer_id = Some(conn);
                let peer_id = record.peer_id.clone();
                let replaced = self.registry.insert(record).is_some();
                info!(room = %self.name, %conn, %peer_id, replaced, "peer registered");
                match self.baseline() {
                    Ok(baseline) => {
                        let _ = self.events.send(baseline);
                    }
                    Err(err) => error!(room = %self.name, error = %err, "failed to broadcast baseline"),
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(room = %self.name, %conn, error = %err, "dropping invalid registration");
            }
        }
    }
}

/// Lazily created rooms, one actor each. Rooms live for the life of the hub.
pub struct Rooms {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    chain: ChainConfig,
    cluster: ClusterConfig,
    capacity: usize,
}

impl Rooms {
    pub fn new(chain: ChainConfig, cluster: ClusterConfig, capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            chain,
            cluster,
            capacity,
        }
    }

    pub async fn get_or_open(&self, name: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(name).filter(|room| !room.tx.is_closed()) {
            return room.clone();
        }
        let room = RoomHandle::spawn(name, self.chain.clone(), self.cluster.clone(), self.capacity);
        rooms.insert(name.to_string(), room.clone());
        room
    }

    pub async fn count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

#[cfg(test)]
#[path = "tests/room_tests.rs"]
mod tests;
