//! Maps [`licensing_core::Error`] onto the status/body contract of §6/§7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use licensing_core::Error;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::TimeOutOfSync | Error::LicenseExpired | Error::LicenseInactive | Error::LicenseIssuerDisabled | Error::ProductInactive | Error::LicenseSessionExpired => {
                (StatusCode::FORBIDDEN, self.0.to_string())
            }
            Error::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            Error::RateLimited => (StatusCode::CONFLICT, self.0.to_string()),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            Error::Sensitive { message, underlying } => {
                tracing::error!(cause = %underlying, "sensitive failure");
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            }
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}
