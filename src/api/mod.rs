//! HTTP surface: status endpoints, routing, and JSON errors.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
