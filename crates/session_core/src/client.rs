use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use shared::{
    domain::{Handle, PeerId, ProgramId},
    error::ProtocolError,
    protocol::{Baseline, Envelope, PeerRecord},
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    collaborators::{MpcClient, ProgramUploader},
    session::{self, ContributionAttempt, OwnerSession, SessionError},
    store::{SessionStore, StoreEvent},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unsupported server url `{0}`")]
    InvalidUrl(String),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("expected a baseline, got `{0}`")]
    UnexpectedEnvelope(String),
    #[error("connection to the room is closed")]
    Closed,
    #[error("timed out waiting for the room")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Store(StoreEvent),
    Error(String),
    Disconnected,
}

enum Outbound {
    Text(String),
    Close,
}

/// Builds the room endpoint on `server_url`, switching between the
/// WebSocket and plain HTTP schemes.
pub fn room_url(server_url: &str, room: &str, websocket: bool) -> Result<Url, ClientError> {
    let mut url = Url::parse(server_url)?;
    let scheme = match (url.scheme(), websocket) {
        ("http" | "ws", true) => "ws",
        ("https" | "wss", true) => "wss",
        ("http" | "ws", false) => "http",
        ("https" | "wss", false) => "https",
        _ => return Err(ClientError::InvalidUrl(server_url.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(server_url.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| ClientError::InvalidUrl(server_url.to_string()))?
        .clear()
        .push("parties")
        .push(room);
    url.set_query(None);
    Ok(url)
}

/// One-off HTTP read of a room's registry and static config.
pub async fn fetch_baseline(server_url: &str, room: &str) -> Result<Baseline, ClientError> {
    let url = room_url(server_url, room, false)?;
    let text = reqwest::get(url).await?.error_for_status()?.text().await?;
    match Envelope::from_json(&text)? {
        Envelope::Baseline(baseline) => Ok(baseline),
        other => Err(ClientError::UnexpectedEnvelope(other.kind().to_string())),
    }
}

/// A peer connected to one room. Incoming envelopes are folded into the
/// local [`SessionStore`] and re-published as [`ClientEvent`]s.
pub struct PeerClient {
    me: PeerRecord,
    store: Mutex<SessionStore>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: broadcast::Sender<ClientEvent>,
}

impl PeerClient {
    pub async fn connect(
        server_url: &str,
        room: &str,
        handle: Handle,
        peer_id: PeerId,
    ) -> Result<Arc<Self>, ClientError> {
        let url = room_url(server_url, room, true)?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        info!(%url, %peer_id, "joined room");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let client = Arc::new(Self {
            me: PeerRecord {
                handle,
                peer_id: peer_id.clone(),
                session_peer_id: None,
            },
            store: Mutex::new(SessionStore::new(peer_id)),
            outbound,
            events,
        });

        tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let result = match outbound {
                    Outbound::Text(text) => ws_writer.send(Message::Text(text)).await,
                    Outbound::Close => break,
                };
                if let Err(err) = result {
                    error!(error = %err, "failed to send envelope");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let reader_client = Arc::clone(&client);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader_client.receive(&text).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "room connection failed");
                        let _ = reader_client.events.send(ClientEvent::Error(err.to_string()));
                        break;
                    }
                }
            }
            info!("left room");
            let _ = reader_client.events.send(ClientEvent::Disconnected);
        });

        client.send(&Envelope::Register(client.me.clone()))?;
        Ok(client)
    }

    async fn receive(&self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping undecodable envelope");
                let _ = self.events.send(ClientEvent::Error(err.to_string()));
                return;
            }
        };
        let event = self.store.lock().await.apply(envelope);
        debug!(?event, "store updated");
        let _ = self.events.send(ClientEvent::Store(event));
    }

    pub fn me(&self) -> &PeerRecord {
        &self.me
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let text = envelope.to_json()?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| ClientError::Closed)
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    pub async fn snapshot(&self) -> SessionStore {
        self.store.lock().await.clone()
    }

    pub async fn with_store<R>(&self, f: impl FnOnce(&mut SessionStore) -> R) -> R {
        f(&mut *self.store.lock().await)
    }

    /// Resolves once `ready` holds for the local view.
    pub async fn wait_until(
        &self,
        timeout: Duration,
        ready: impl Fn(&SessionStore) -> bool,
    ) -> Result<(), ClientError> {
        let mut events = self.subscribe();
        let wait = async {
            loop {
                if ready(&*self.store.lock().await) {
                    return Ok(());
                }
                match events.recv().await {
                    Ok(ClientEvent::Disconnected) | Err(broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::Closed)
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    pub async fn publish(
        &self,
        owner: &mut OwnerSession,
        uploader: &dyn ProgramUploader,
    ) -> Result<ProgramId, ClientError> {
        Ok(owner.publish(uploader).await?)
    }

    pub async fn submit_bindings(&self, owner: &mut OwnerSession) -> Result<(), ClientError> {
        let envelope = owner.submit_bindings(&mut *self.store.lock().await)?;
        self.send(&envelope)
    }

    pub async fn resend_task(&self, owner: &OwnerSession, peer: &PeerId) -> Result<(), ClientError> {
        let envelope = owner.task_for(&*self.store.lock().await, peer)?;
        self.send(&envelope)
    }

    pub async fn execute(
        &self,
        owner: &mut OwnerSession,
        mpc: &dyn MpcClient,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        let snapshot = self.snapshot().await;
        Ok(owner.execute(&snapshot, mpc).await?)
    }

    /// Stores this peer's inputs and announces the outcome to the room. The
    /// returned attempt carries the store failure, if any, after the "contrib"
    /// envelope has been sent.
    pub async fn contribute(
        &self,
        values: &BTreeMap<String, String>,
        mpc: &dyn MpcClient,
    ) -> Result<ContributionAttempt, ClientError> {
        let snapshot = self.snapshot().await;
        let attempt = session::contribute(&snapshot, values, mpc).await?;
        self.send(&attempt.envelope)?;
        Ok(attempt)
    }

    pub async fn cancel(&self) -> Option<ProgramId> {
        self.store.lock().await.deactivate()
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
