//! Axum wiring around the license-session wire handler (§4.6).

pub mod handlers;
pub mod router;
pub mod state;
pub mod wire;
pub mod wire_error;

pub use router::build_router;
pub use state::AppState;
