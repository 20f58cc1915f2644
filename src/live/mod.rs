//! Connection to the live model.

pub mod connector;
pub mod protocol;
pub mod websocket;

pub use connector::{Connector, LiveConfig, LiveLink, MockConnector, MockRemote, Outbound};
pub use websocket::WebSocketConnector;
