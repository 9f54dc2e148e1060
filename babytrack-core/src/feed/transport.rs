//! Transports carrying feed messages.
//!
//! A transport turns "connect to this baby's channel" into a pair of message
//! queues. `WsTransport` talks to the server over WebSocket; `LoopbackTransport`
//! connects clients in the same process to each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use super::protocol::FeedMessage;
use super::FeedError;
use crate::identity::Caregiver;
use crate::remote::realtime_url;

/// Capacity of the per-connection message queues.
const QUEUE_CAPACITY: usize = 64;

/// An open connection to one baby's channel.
#[derive(Debug)]
pub struct FeedConnection {
    pub outbound: mpsc::Sender<FeedMessage>,
    pub inbound: mpsc::Receiver<FeedMessage>,
}

pub trait FeedTransport: Send + Sync + 'static {
    fn connect(
        &self,
        baby_id: Uuid,
        who: &Caregiver,
    ) -> impl Future<Output = Result<FeedConnection, FeedError>> + Send;
}

/// WebSocket transport to the realtime endpoint of the server.
#[derive(Debug, Clone)]
pub struct WsTransport {
    server_url: String,
}

impl WsTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

impl FeedTransport for WsTransport {
    async fn connect(&self, baby_id: Uuid, who: &Caregiver) -> Result<FeedConnection, FeedError> {
        let url = realtime_url(&self.server_url, baby_id, &who.token);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::Connection(e.to_string()))?;
        let (mut sender, mut receiver) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<FeedMessage>(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<FeedMessage>(QUEUE_CAPACITY);

        // Writer: drains the outbound queue, closes the socket when it ends.
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let encoded = match msg.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        tracing::warn!("Failed to encode feed message: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Binary(encoded.into())).await.is_err() {
                    break;
                }
            }
            let _ = sender.send(Message::Close(None)).await;
        });

        // Reader: decodes frames into the inbound queue.
        tokio::spawn(async move {
            while let Some(frame) = receiver.next().await {
                match frame {
                    Ok(Message::Binary(data)) => match FeedMessage::decode(&data) {
                        Ok(msg) => {
                            if inbound_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping undecodable feed frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {
                        // Ping/pong are answered by tungstenite
                    }
                    Err(e) => {
                        tracing::warn!("Feed connection error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(FeedConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

type Envelope = (u64, FeedMessage);

/// In-process transport. Every connection to the same baby sees the messages
/// the others send, the way the server relays them. `publish` injects messages
/// as if they came from the server.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

#[derive(Debug, Default)]
struct LoopbackInner {
    next_conn: AtomicU64,
    channels: Mutex<HashMap<Uuid, broadcast::Sender<Envelope>>>,
}

/// Sender id used for messages injected through `publish`.
const SERVER_CONN: u64 = 0;

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, baby_id: Uuid) -> broadcast::Sender<Envelope> {
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        channels
            .entry(baby_id)
            .or_insert_with(|| broadcast::channel(QUEUE_CAPACITY).0)
            .clone()
    }

    /// Delivers a message to every connection on the baby's channel. Returns
    /// the number of connections reached.
    pub fn publish(&self, baby_id: Uuid, msg: FeedMessage) -> usize {
        self.channel(baby_id).send((SERVER_CONN, msg)).unwrap_or(0)
    }
}

impl FeedTransport for LoopbackTransport {
    async fn connect(&self, baby_id: Uuid, _who: &Caregiver) -> Result<FeedConnection, FeedError> {
        let conn_id = self.inner.next_conn.fetch_add(1, Ordering::SeqCst) + 1;
        let channel = self.channel(baby_id);
        let mut relay = channel.subscribe();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<FeedMessage>(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<FeedMessage>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    sent = outbound_rx.recv() => match sent {
                        Some(FeedMessage::Join { .. }) => {
                            let joined = FeedMessage::Joined {
                                baby_id: baby_id.to_string(),
                                online: Vec::new(),
                            };
                            if inbound_tx.send(joined).await.is_err() {
                                break;
                            }
                        }
                        Some(msg) => {
                            let _ = channel.send((conn_id, msg));
                        }
                        None => break,
                    },
                    received = relay.recv() => match received {
                        Ok((from, msg)) if from != conn_id => {
                            if inbound_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Loopback connection lagged by {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(FeedConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
