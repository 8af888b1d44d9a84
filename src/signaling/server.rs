//! WebSocket transport for the signaling mediator.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use super::mediator::SignalingMediator;
use super::registry::Outbound;

pub struct SignalingServer {
    mediator: Arc<SignalingMediator>,
    path: String,
}

impl SignalingServer {
    /// Serve WebSocket upgrades on `path` only.
    pub fn new(mediator: Arc<SignalingMediator>, path: impl Into<String>) -> Self {
        Self {
            mediator,
            path: path.into(),
        }
    }

    pub async fn bind(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind signaling server to {}", addr))?;
        tracing::info!(
            "Signaling server listening on {}",
            listener.local_addr().context("listener has no local address")?
        );
        Ok(listener)
    }

    /// Accept connections until `shutdown` resolves. Each peer runs on its own task.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Signaling server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, addr).await {
                                tracing::warn!("Connection from {} ended with error: {:#}", addr, e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let expected = self.path.clone();
        let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().path() == expected {
                return Ok(resp);
            }
            tracing::warn!("Rejecting upgrade for path {}", req.uri().path());
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        };

        let ws = tokio_tungstenite::accept_hdr_async(stream, check_path)
            .await
            .context("WebSocket handshake failed")?;
        let (mut sink, mut frames) = ws.split();

        let registry = self.mediator.registry();
        let (client_id, mut outbound) = registry.register();
        let control = registry
            .sender(&client_id)
            .context("client vanished right after registering")?;
        tracing::info!("Client {} connected from {}", client_id, addr);

        let writer_id = client_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(out) = outbound.recv().await {
                let sent = match out {
                    Outbound::Text(text) => sink.send(Message::Text(text)).await,
                    Outbound::Pong(data) => sink.send(Message::Pong(data)).await,
                    Outbound::Close => {
                        // The peer may already have closed its side.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = sent {
                    tracing::warn!("Failed to send to {}: {}", writer_id, e);
                    break;
                }
            }
        });

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    tracing::debug!("WS recv from {}: {}", client_id, text);
                    self.mediator.handle_text(&client_id, &text);
                }
                Ok(Message::Ping(data)) => {
                    if control.send(Outbound::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!("Client {} closed: {:?}", client_id, frame);
                    break;
                }
                Ok(other) => tracing::debug!("WS frame (ignored): {:?}", other),
                Err(e) => {
                    tracing::warn!("WebSocket receive error from {}: {}", client_id, e);
                    break;
                }
            }
        }

        drop(control);
        self.mediator.disconnect(&client_id);
        if writer.await.is_err() {
            tracing::warn!("Writer task for {} panicked", client_id);
        }
        Ok(())
    }
}
