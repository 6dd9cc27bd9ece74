//! Per-subscriber connection state and its read/write loops.

use crate::auth::Claims;
use crate::ws::hub::HubHandle;
use crate::ws::message::SubscriptionMessage;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Capacity of the outbound queue. A subscriber that falls this far behind is
/// disconnected.
pub const OUTBOUND_BUFFER: usize = 256;

/// One live WebSocket subscriber: the owning endpoint, validated claims, and
/// the topic set mutated by its read loop. The outbound queue lives in the
/// hub's registry entry; the hub backreference is only used to request
/// unregistration.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    endpoint: String,
    claims: Claims,
    topics: RwLock<HashSet<String>>,
    hub: HubHandle,
}

impl Connection {
    pub fn new(endpoint: String, claims: Claims, hub: HubHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            claims,
            topics: RwLock::new(HashSet::new()),
            hub,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub async fn subscribe(&self, topic: String) {
        debug!(id = %self.id, topic = %topic, "subscribed");
        self.topics.write().await.insert(topic);
    }

    pub async fn unsubscribe(&self, topic: &str) {
        debug!(id = %self.id, topic = %topic, "unsubscribed");
        self.topics.write().await.remove(topic);
    }

    pub async fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.read().await.contains(topic)
    }

    #[cfg(test)]
    pub(crate) async fn topics(&self) -> HashSet<String> {
        self.topics.read().await.clone()
    }

    pub fn request_unregister(&self) {
        self.hub.request_unregister(self.id);
    }
}

/// Reads frames until the transport fails or the peer closes. Subscription
/// frames mutate the topic set; malformed frames are dropped. Protocol pings
/// are answered with a pong by the protocol layer on the write half.
pub(crate) async fn read_pump(conn: std::sync::Arc<Connection>, mut stream: SplitStream<WebSocket>) {
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => {
                let Ok(msg) = serde_json::from_str::<SubscriptionMessage>(&text) else {
                    continue;
                };
                match msg {
                    SubscriptionMessage::Subscribe { topic } => conn.subscribe(topic).await,
                    SubscriptionMessage::Unsubscribe { topic } => conn.unsubscribe(&topic).await,
                }
            }
            // Pings are answered with pongs by the protocol layer on the
            // write half.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Drains the outbound queue onto the wire, one text message per frame. A
/// closed queue (the hub unregistered us) sends a close frame; a write error
/// just exits. Either way the connection is torn down by the caller.
pub(crate) async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
) {
    while let Some(frame) = outbound.recv().await {
        if sink.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
