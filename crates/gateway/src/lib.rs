//! Gateway: the hospital coordination hub.
//!
//! Lifecycle:
//! 1. Load config
//! 2. Build shared state (directory, request ledger, presence channel)
//! 3. Start HTTP server (health, registration)
//! 4. Attach WebSocket upgrade handler
//! 5. Start the request retention sweep
//!
//! Protocol semantics live in `hub.rs`; `ws.rs` and `api.rs` only adapt the
//! transports to it.

pub mod api;
pub mod directory;
pub mod error;
pub mod hub;
pub mod ledger;
pub mod presence;
pub mod server;
pub mod signaling;
pub mod state;
pub mod ws;

pub use {
    error::HubError,
    hub::{Hub, HubOptions, HubStats},
    server::{build_gateway_app, spawn_sweeper, start_gateway},
    state::GatewayState,
};
