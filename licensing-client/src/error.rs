//! Client-visible failure classification (§4.7): every transport/decrypt
//! outcome is either [`Error::Temporary`] (worth retrying with backoff) or
//! [`Error::Permanent`] (surface and stop).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("temporary failure: {0}")]
    Temporary(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl Error {
    pub fn is_temporary(&self) -> bool {
        matches!(self, Error::Temporary(_))
    }

    /// Classify an HTTP response status per §4.7: network errors, 5xx, and
    /// 409 (rate limited) are temporary; everything else is permanent.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::CONFLICT {
            Error::Temporary(format!("{status}: {body}"))
        } else {
            Error::Permanent(format!("{status}: {body}"))
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Temporary(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
