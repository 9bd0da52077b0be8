//! HTTP binding for the decision engine.

mod handlers;
mod server;

pub use handlers::{AppState, ErrorResponse, HealthResponse};
pub use server::{router, HttpServer};
