//! Library crate for tandem-back, exposing modules for binaries and integration tests.

/// Runtime configuration loaded from `config/app.json`.
pub mod config;
/// Persistence: entities, the store trait and its backends.
pub mod dao;
mod dto;
mod error;
/// HTTP, SSE and WebSocket routing.
pub mod routes;
/// Business logic behind the routes.
pub mod services;
/// Shared application state.
pub mod state;
