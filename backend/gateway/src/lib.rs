//! Confab gateway HTTP API server.
//!
//! Streams turns over Server-Sent Events and exposes confirmation control,
//! session inspection and tool listing as JSON endpoints.

pub mod error;
pub mod routes;
pub mod server;
pub mod sse;

pub use error::ApiError;
pub use server::{AppState, build_router, start_server};
