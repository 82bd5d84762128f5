//! Transport Seam
//!
//! A transport opens and accepts direct links between participants given a
//! discoverable identifier, and guarantees reliable in-order delivery per
//! link once open. NAT traversal and signaling live behind this trait, not
//! in the core.
//!
//! Two implementations ship: [`MemoryTransport`] (in-process, used by the
//! demo and the integration tests) and [`crate::network::ws::WsTransport`]
//! (WebSocket).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::network::protocol::ParticipantId;

/// Outbound frame buffer per link.
pub const LINK_CHANNEL_CAPACITY: usize = 64;

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transport could not be initialized or has shut down.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// No reachable participant is listening under the given id.
    #[error("target unreachable: {0}")]
    TargetUnreachable(ParticipantId),
}

/// Events delivered on an open link. Open itself is implicit: a
/// [`LinkHandle`] exists only once the link is open.
#[derive(Debug)]
pub enum LinkEvent {
    /// One inbound frame, in send order.
    Data(String),
    /// The remote end closed the link.
    Closed,
    /// The link failed. Treated like a close for roster purposes.
    Error(String),
}

/// One open point-to-point link.
///
/// Dropping the handle closes the link; the remote end observes
/// [`LinkEvent::Closed`].
#[derive(Debug)]
pub struct LinkHandle {
    /// Remote participant id when known at open time (outbound connects).
    /// Inbound links learn it from the `player_info` exchange.
    pub remote: Option<ParticipantId>,
    /// Outbound frames, delivered in send order.
    pub tx: mpsc::Sender<String>,
    /// Inbound frames and lifecycle events.
    pub events: mpsc::Receiver<LinkEvent>,
}

/// External transport contract.
///
/// `local_id` is assigned once per transport instance and doubles as the
/// session id when hosting (advertised out-of-band, e.g. a shareable link
/// carrying `room=<id>`).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The locally assigned participant id.
    fn local_id(&self) -> &ParticipantId;

    /// Open a link to a remote participant. Resolves once the link is open.
    async fn connect(&self, remote: &ParticipantId) -> Result<LinkHandle, TransportError>;

    /// Start accepting inbound links. The caller accepts a link by pumping
    /// the handle, or refuses it by dropping the handle (which closes it).
    async fn listen(&self) -> Result<mpsc::Receiver<LinkHandle>, TransportError>;
}

// =============================================================================
// IN-MEMORY TRANSPORT
// =============================================================================

/// In-process rendezvous for [`MemoryTransport`] endpoints.
///
/// Every endpoint created from the same hub (clones share state) can dial
/// every listening endpoint by id. Links are channel pairs pumped by
/// background tasks, so per-link FIFO ordering matches the real transports.
#[derive(Clone, Default)]
pub struct MemoryHub {
    listeners: Arc<Mutex<HashMap<ParticipantId, mpsc::Sender<LinkHandle>>>>,
}

impl MemoryHub {
    /// Create a hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint with a freshly assigned id.
    pub fn endpoint(&self) -> MemoryTransport {
        MemoryTransport {
            id: ParticipantId::new(uuid::Uuid::new_v4().to_string()),
            hub: self.clone(),
        }
    }
}

/// In-memory transport endpoint.
pub struct MemoryTransport {
    id: ParticipantId,
    hub: MemoryHub,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn connect(&self, remote: &ParticipantId) -> Result<LinkHandle, TransportError> {
        let listener = {
            let listeners = self
                .hub
                .listeners
                .lock()
                .map_err(|e| TransportError::Unavailable(e.to_string()))?;
            listeners.get(remote).cloned()
        };
        let listener = listener.ok_or_else(|| TransportError::TargetUnreachable(remote.clone()))?;

        let (caller, callee) = link_pair(Some(remote.clone()));
        listener
            .send(callee)
            .await
            .map_err(|_| TransportError::TargetUnreachable(remote.clone()))?;
        Ok(caller)
    }

    async fn listen(&self) -> Result<mpsc::Receiver<LinkHandle>, TransportError> {
        let (tx, rx) = mpsc::channel(16);
        let mut listeners = self
            .hub
            .listeners
            .lock()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        listeners.insert(self.id.clone(), tx);
        Ok(rx)
    }
}

/// Build two connected link handles. The caller side knows the remote id;
/// the callee side learns it from the `player_info` exchange.
fn link_pair(remote: Option<ParticipantId>) -> (LinkHandle, LinkHandle) {
    let (caller_out_tx, caller_out_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);
    let (callee_out_tx, callee_out_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);
    let (caller_ev_tx, caller_ev_rx) = mpsc::channel::<LinkEvent>(LINK_CHANNEL_CAPACITY);
    let (callee_ev_tx, callee_ev_rx) = mpsc::channel::<LinkEvent>(LINK_CHANNEL_CAPACITY);

    tokio::spawn(pump(caller_out_rx, callee_ev_tx));
    tokio::spawn(pump(callee_out_rx, caller_ev_tx));

    (
        LinkHandle {
            remote,
            tx: caller_out_tx,
            events: caller_ev_rx,
        },
        LinkHandle {
            remote: None,
            tx: callee_out_tx,
            events: callee_ev_rx,
        },
    )
}

/// Forward one direction of a link; emit `Closed` when the sender drops.
async fn pump(mut out_rx: mpsc::Receiver<String>, ev_tx: mpsc::Sender<LinkEvent>) {
    while let Some(frame) = out_rx.recv().await {
        if ev_tx.send(LinkEvent::Data(frame)).await.is_err() {
            // Receiving side is gone; nothing left to deliver to.
            return;
        }
    }
    let _ = ev_tx.send(LinkEvent::Closed).await;
}

// =============================================================================
// TESTS
// =============================================================================
