//! Transport seam for the protocol client.
//!
//! A [`Connector`] opens a [`Connection`]: a pair of text-frame channels.
//! Closing the outbound sender closes the transport; the inbound receiver
//! yields `None` once the remote side is gone.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::ClientError;

/// An open transport carrying JSON text frames.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens connections to the coordinator.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection, ClientError>;
}

/// Connects over WebSocket with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    channel_capacity: usize,
}

impl WebSocketConnector {
    pub fn new(channel_capacity: usize) -> Self {
        Self { channel_capacity }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Connection, ClientError> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(format!("websocket connect failed: {e}")))?;

        tracing::debug!(%url, status = %response.status(), "websocket connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.channel_capacity);
        let (in_tx, in_rx) = mpsc::channel::<String>(self.channel_capacity);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "websocket send failed");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!("dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket receive failed");
                        break;
                    }
                };
                if in_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
