//! Domain errors and their HTTP representation.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::service::data::ErrorBody;
use crate::service::pool::PoolError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    /// Body parsing failed before any image was decoded.
    #[error("{0}")]
    InvalidRequest(String),
    /// Bytes arrived but are not a decodable image.
    #[error("failed to decode image")]
    InvalidImage(String),
    /// The session pool could not lend a session in time.
    #[error(transparent)]
    Session(#[from] PoolError),
    /// The detection pipeline gave up after its retries.
    #[error("{0}")]
    Processing(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InvalidImage(_) => "invalid_image",
            AppError::Session(_) => "session_error",
            AppError::Processing(_) => "processing_error",
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            AppError::InvalidImage(details) => Some(details.clone()),
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) | AppError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AppError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            code: self.code(),
            message: self.to_string(),
            details: self.details(),
        })
    }
}
