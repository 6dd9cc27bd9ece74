//! WebSocket fabric: hub, connections, wire messages, audience targeting.

pub mod connection;
pub mod hub;
pub mod message;
pub mod targeting;

pub use connection::Connection;
pub use hub::{Hub, HubHandle};
pub use message::{BroadcastMessage, SubscriptionMessage, Target};
