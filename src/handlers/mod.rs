pub mod http;
pub mod ws;

pub use http::{health, ping, publish, AppState};
pub use ws::ws_handler;
