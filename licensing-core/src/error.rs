//! Error kinds produced by the licensing core.
//!
//! Variants map 1:1 onto the client-visible outcomes of a create/refresh/delete
//! request; [`Error::Sensitive`] wraps anything that must not leak details to a
//! caller (store failures, crypto-random exhaustion, marshaling bugs).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("time out of sync")]
    TimeOutOfSync,

    #[error("license has expired")]
    LicenseExpired,

    #[error("license is inactive")]
    LicenseInactive,

    #[error("license issuer is disabled")]
    LicenseIssuerDisabled,

    #[error("product is inactive")]
    ProductInactive,

    #[error("license session has expired")]
    LicenseSessionExpired,

    #[error("rate limited")]
    RateLimited,

    #[error("not found")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A failure whose cause must not reach the client. `message` is safe to
    /// return verbatim; `underlying` is logged server-side only.
    #[error("{message}")]
    Sensitive {
        message: String,
        #[source]
        underlying: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl Error {
    pub fn sensitive<E>(message: impl Into<String>, underlying: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Sensitive {
            message: message.into(),
            underlying: Box::new(underlying),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::sensitive("session store unavailable", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("malformed payload: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
