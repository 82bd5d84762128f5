//! WebSocket Transport
//!
//! Links are WebSocket connections: the host binds a TCP listener and its
//! dialable `ws://` URL doubles as its participant id (the shareable
//! session id); guests dial that URL with a freshly assigned UUID id.
//! Frame order per link follows from TCP.

use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info};

use crate::network::protocol::ParticipantId;
use crate::network::transport::{LinkEvent, LinkHandle, Transport, TransportError, LINK_CHANNEL_CAPACITY};

/// WebSocket transport endpoint.
pub struct WsTransport {
    id: ParticipantId,
    listener: Mutex<Option<TcpListener>>,
}

impl WsTransport {
    /// Bind a listening endpoint. The bound URL becomes the local id.
    ///
    /// Call [`Transport::listen`] before advertising the id: the socket is
    /// bound here but handshakes are only served once the accept loop runs.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        info!("WebSocket transport listening on {}", local);
        Ok(Self {
            id: ParticipantId::new(format!("ws://{}", local)),
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Create a connect-only endpoint with a freshly assigned id.
    pub fn connector() -> Self {
        Self {
            id: ParticipantId::new(uuid::Uuid::new_v4().to_string()),
            listener: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn local_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn connect(&self, remote: &ParticipantId) -> Result<LinkHandle, TransportError> {
        if !remote.as_str().starts_with("ws://") && !remote.as_str().starts_with("wss://") {
            return Err(TransportError::TargetUnreachable(remote.clone()));
        }

        let (socket, _response) = connect_async(remote.as_str())
            .await
            .map_err(|_| TransportError::TargetUnreachable(remote.clone()))?;
        debug!("Connected to {}", remote);
        Ok(spawn_socket_pumps(socket, Some(remote.clone())))
    }

    async fn listen(&self) -> Result<mpsc::Receiver<LinkHandle>, TransportError> {
        let listener = self
            .listener
            .lock()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?
            .take()
            .ok_or_else(|| TransportError::Unavailable("endpoint is connect-only".to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                };
                match accept_async(stream).await {
                    Ok(socket) => {
                        debug!("Inbound link from {}", addr);
                        if tx.send(spawn_socket_pumps(socket, None)).await.is_err() {
                            // Listener receiver dropped; stop accepting.
                            return;
                        }
                    }
                    Err(e) => {
                        error!("WebSocket handshake failed for {}: {}", addr, e);
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Split a socket into reader/writer tasks bridged to link channels.
fn spawn_socket_pumps<S>(socket: WebSocketStream<S>, remote: Option<ParticipantId>) -> LinkHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);
    let (ev_tx, ev_rx) = mpsc::channel::<LinkEvent>(LINK_CHANNEL_CAPACITY);

    // Writer: drain outbound frames until the handle drops, then close.
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Reader: surface frames and lifecycle events.
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if ev_tx.send(LinkEvent::Data(text)).await.is_err() {
                        return;
                    }
                }
                Ok(Message::Close(_)) => {
                    let _ = ev_tx.send(LinkEvent::Closed).await;
                    return;
                }
                // Ping/pong are answered by tungstenite; binary is not part
                // of this protocol.
                Ok(_) => {}
                Err(e) => {
                    let _ = ev_tx.send(LinkEvent::Error(e.to_string())).await;
                    return;
                }
            }
        }
        let _ = ev_tx.send(LinkEvent::Closed).await;
    });

    LinkHandle {
        remote,
        tx: out_tx,
        events: ev_rx,
    }
}

// =============================================================================
// TESTS
// =============================================================================
