//! Process-level concerns for the license-session service binary: logging
//! setup and the sensitive-value redaction helpers it wires into `tracing`.

pub mod logging;
