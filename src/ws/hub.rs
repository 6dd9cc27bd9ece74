//! Connection registry and fan-out.

use crate::auth::Claims;
use crate::error::{AppError, AppResult};
use crate::ws::connection::{read_pump, write_pump, Connection, OUTBOUND_BUFFER};
use crate::ws::message::BroadcastMessage;
use crate::ws::targeting;
use axum::extract::ws::WebSocket;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// A registered connection plus the sending half of its outbound queue. The
/// entry owns the only sender; dropping it on unregister is what signals the
/// write loop to exit.
struct Registered {
    conn: Arc<Connection>,
    outbound: mpsc::Sender<String>,
}

struct HubInner {
    registry: RwLock<HashMap<Uuid, Registered>>,
    register_tx: mpsc::Sender<Registered>,
    unregister_tx: mpsc::Sender<Uuid>,
}

/// Registry of live connections. Registration and unregistration are
/// serialized through a single lifecycle task, the only writer of the
/// registry; broadcasts take the read side.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Creates the hub and spawns its lifecycle task. Must be called inside a
    /// tokio runtime.
    pub fn new() -> Self {
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::channel(64);
        let inner = Arc::new(HubInner {
            registry: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
        });
        tokio::spawn(lifecycle(Arc::clone(&inner), register_rx, unregister_rx));
        Self { inner }
    }

    /// Handle for requesting unregistration without holding the hub.
    pub fn handle(&self) -> HubHandle {
        HubHandle {
            unregister_tx: self.inner.unregister_tx.clone(),
        }
    }

    /// Queues a connection for registration. Blocks briefly if the lifecycle
    /// loop is behind.
    pub async fn register(&self, conn: Arc<Connection>, outbound: mpsc::Sender<String>) {
        let _ = self
            .inner
            .register_tx
            .send(Registered { conn, outbound })
            .await;
    }

    #[cfg(test)]
    pub(crate) async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Runs one upgraded socket to completion: registers the connection,
    /// spawns its write loop, and reads until either side ends, then requests
    /// unregistration.
    pub async fn handle_socket(&self, socket: WebSocket, endpoint: String, claims: Claims) {
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let conn = Arc::new(Connection::new(endpoint, claims, self.handle()));
        info!(id = %conn.id(), endpoint = %conn.endpoint(), "subscriber connected");

        self.register(Arc::clone(&conn), tx).await;

        let mut send_task = tokio::spawn(write_pump(sink, rx));
        let reader = Arc::clone(&conn);
        let mut recv_task = tokio::spawn(async move { read_pump(reader, stream).await });

        tokio::select! {
            // Write half died first (write error): stop reading.
            _ = &mut send_task => recv_task.abort(),
            // Read half finished (close or transport error): unregistration
            // below closes the queue and lets the write loop drain out.
            _ = &mut recv_task => {}
        }

        conn.request_unregister();
        info!(id = %conn.id(), endpoint = %conn.endpoint(), "subscriber disconnected");
    }

    /// Offers `msg` to every matching live connection and returns how many
    /// accepted it. Does not wait for write loops; connections with a full
    /// outbound queue are dropped and queued for unregistration.
    pub async fn broadcast(&self, msg: &BroadcastMessage) -> AppResult<usize> {
        if msg.topic.is_empty() {
            return Err(AppError::MissingTopic);
        }
        targeting::validate_target(&msg.target)?;

        // Serialized once; every subscriber gets the same bytes.
        let payload =
            serde_json::to_string(msg).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let mut delivered = 0;
        let mut overflowed = Vec::new();
        {
            let registry = self.inner.registry.read().await;
            for entry in registry.values() {
                let conn = &entry.conn;
                if conn.endpoint() != msg.endpoint {
                    continue;
                }
                if !conn.is_subscribed(&msg.topic).await {
                    continue;
                }
                if !targeting::should_receive(conn.claims(), &msg.target) {
                    continue;
                }

                match entry.outbound.try_send(payload.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        debug!(id = %conn.id(), topic = %msg.topic, "message enqueued");
                    }
                    Err(_) => {
                        debug!(id = %conn.id(), "outbound queue full, dropping connection");
                        overflowed.push(conn.id());
                    }
                }
            }
        }

        if !overflowed.is_empty() {
            let handle = self.handle();
            for id in &overflowed {
                handle.request_unregister(*id);
            }
            info!(count = overflowed.len(), "unregistered slow subscribers");
        }

        Ok(delivered)
    }
}

/// The single registry writer. Consumes register and unregister events until
/// the hub is dropped.
async fn lifecycle(
    inner: Arc<HubInner>,
    mut register_rx: mpsc::Receiver<Registered>,
    mut unregister_rx: mpsc::Receiver<Uuid>,
) {
    loop {
        tokio::select! {
            Some(entry) = register_rx.recv() => {
                inner.registry.write().await.insert(entry.conn.id(), entry);
            }
            Some(id) = unregister_rx.recv() => {
                // Removing the entry drops the outbound sender, which closes
                // the queue and signals the write loop.
                inner.registry.write().await.remove(&id);
            }
            else => break,
        }
    }
}

/// Backreference from connections (and the broadcast path) to the hub,
/// exposing only unregistration.
#[derive(Debug, Clone)]
pub struct HubHandle {
    unregister_tx: mpsc::Sender<Uuid>,
}

impl HubHandle {
    /// Requests unregistration without blocking. If the unregister queue is
    /// saturated the send is offloaded to a task so broadcasts never wait on
    /// a slow unregister path.
    pub fn request_unregister(&self, id: Uuid) {
        match self.unregister_tx.try_send(id) {
            Ok(()) => {}
            Err(TrySendError::Full(id)) => {
                let tx = self.unregister_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(id).await;
                });
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
