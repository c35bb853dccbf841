//! HTTP surface for the ContextNexus backend.
//!
//! Exposes query execution (with SSE streaming) and the selection endpoints
//! over axum, mapping the core error taxonomy onto HTTP statuses.

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{router, serve};
pub use state::AppState;
