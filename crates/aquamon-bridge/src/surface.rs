//! WebSocket host for the rendering surface.
//!
//! [`SurfaceServer`] accepts the map surface's WebSocket connection and
//! pumps frames in both directions:
//!
//! 1. **Outbound** – frames queued by [`MessageBridge::send`] are drained
//!    from the [`SurfaceLink`] and written as text messages, in order.
//! 2. **Inbound** – text messages are handed to
//!    [`MessageBridge::receive_frame`] verbatim.
//!
//! Only one surface may be attached at a time; a second connection is closed
//! immediately. When the surface disconnects the bridge is marked unloaded so
//! later commands are parked until the next `ready`.

use std::net::SocketAddr;
use std::sync::Arc;

use aquamon_types::AquaError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bridge::{MessageBridge, SurfaceLink};

/// Serves the bridge to a single WebSocket-connected rendering surface.
#[derive(Clone)]
pub struct SurfaceServer {
    bridge: MessageBridge,
    link: Arc<Mutex<SurfaceLink>>,
}

impl SurfaceServer {
    pub fn new(bridge: MessageBridge, link: SurfaceLink) -> Self {
        Self {
            bridge,
            link: Arc::new(Mutex::new(link)),
        }
    }

    /// Bind `addr` and serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`AquaError::Transport`] if the TCP listener cannot be bound.
    pub async fn run(self, addr: SocketAddr) -> Result<(), AquaError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AquaError::Transport(format!("surface bind error on {addr}: {e}")))?;
        self.serve(listener).await;
        Ok(())
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(local) = listener.local_addr() {
            info!(addr = %local, "map surface endpoint listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_surface(stream, peer).await {
                            error!(peer = %peer, error = %e, "surface connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "surface accept error");
                }
            }
        }
    }

    async fn handle_surface(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), AquaError> {
        let Ok(mut link) = Arc::clone(&self.link).try_lock_owned() else {
            warn!(peer = %peer, "a surface is already attached; refusing connection");
            return Ok(());
        };

        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| AquaError::Transport(format!("ws handshake from {peer}: {e}")))?;
        info!(peer = %peer, "map surface attached");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        loop {
            tokio::select! {
                frame = link.next_frame() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        debug!(peer = %peer, "surface write failed; dropping frame");
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(peer = %peer, error = %e, "surface read error");
                            break;
                        }
                        Some(Ok(Message::Text(text))) => self.bridge.receive_frame(text.as_str()),
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.bridge.receive_frame(text),
                            Err(_) => warn!(peer = %peer, "dropping non-UTF-8 surface frame"),
                        },
                        _ => {}
                    }
                }
            }
        }

        self.bridge.mark_unloaded();
        info!(peer = %peer, "map surface detached");
        Ok(())
    }
}
