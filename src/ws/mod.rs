//! WebSocket module — real-time message relay.
//!
//! - [`registry`]: Set of connected clients and their send handles.
//! - [`dispatcher`]: Fan-out with per-client failure isolation.
//! - [`messages`]: Inbound/outbound/error wire shapes.
//! - [`handler`]: Axum WebSocket upgrade handler.

pub mod dispatcher;
pub mod handler;
pub mod messages;
pub mod registry;

pub use dispatcher::{BroadcastReport, Dispatcher};
pub use handler::ws_handler;
pub use messages::{ErrorMessage, InboundMessage, OutboundMessage};
pub use registry::{ClientHandle, ClientId, Registry};
