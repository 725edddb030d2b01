//! Drives the licensing protocol from the application side: startup
//! retries, steady-state refresh/expire timers, and cooperative shutdown.

pub mod driver;
pub mod error;
pub mod state;
pub mod transport;
pub mod wire;

pub use driver::SessionDriver;
pub use error::{Error, Result};
pub use state::{SessionInfo, SessionState};
