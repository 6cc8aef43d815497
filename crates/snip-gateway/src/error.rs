use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use snip_shortener::{ShortenerError, ValidationError};
use tracing::error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    /// The request could not be decoded.
    InvalidRequest(String),
    /// The short code does not resolve to a live URL.
    NotFound,
    Shortener(ShortenerError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl AppError {
    /// Status and stable, machine-readable error code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Shortener(e) => match e {
                ShortenerError::Validation(ValidationError::InvalidOwner(_)) => {
                    (StatusCode::BAD_REQUEST, "invalid_owner")
                }
                ShortenerError::Validation(ValidationError::InvalidExpiry(_)) => {
                    (StatusCode::BAD_REQUEST, "invalid_expiry")
                }
                ShortenerError::Validation(ValidationError::InvalidShortCode(_)) => {
                    (StatusCode::BAD_REQUEST, "invalid_short_code")
                }
                ShortenerError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
                ShortenerError::UnsafeUrl => (StatusCode::UNPROCESSABLE_ENTITY, "unsafe_url"),
                ShortenerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                ShortenerError::DedupCheck(_)
                | ShortenerError::Persist(_)
                | ShortenerError::Repository(_)
                | ShortenerError::Generation(_)
                | ShortenerError::GenerationExhausted { .. }
                | ShortenerError::CreationExhausted { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::InvalidRequest(message) => message.clone(),
            AppError::NotFound => "short url not found".to_string(),
            AppError::Shortener(e) if e.is_client_error() => e.to_string(),
            AppError::Shortener(_) => "internal server error".to_string(),
        }
    }
}

impl From<ShortenerError> for AppError {
    fn from(error: ShortenerError) -> Self {
        AppError::Shortener(error)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            if let AppError::Shortener(e) = &self {
                error!(error = %e, code, "Request failed");
            }
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message: self.message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_core::{ShortCode, StorageError};

    #[test]
    fn client_errors_keep_their_message() {
        let err = AppError::from(ShortenerError::Validation(ValidationError::Blacklisted(
            "bit.ly".to_string(),
        )));
        assert_eq!(
            err.status_and_code(),
            (StatusCode::BAD_REQUEST, "invalid_url")
        );
        assert!(err.message().contains("bit.ly"));

        let err = AppError::from(ShortenerError::NotFound(ShortCode::new_unchecked("abc1234")));
        assert_eq!(err.status_and_code(), (StatusCode::NOT_FOUND, "not_found"));
    }

    #[test]
    fn store_errors_are_not_leaked() {
        let err = AppError::from(ShortenerError::Persist(StorageError::Query(
            "relation \"urls\" does not exist".to_string(),
        )));
        assert_eq!(
            err.status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        );
        assert_eq!(err.message(), "internal server error");
    }

    #[test]
    fn unsafe_urls_are_unprocessable() {
        let err = AppError::from(ShortenerError::UnsafeUrl);
        assert_eq!(
            err.status_and_code(),
            (StatusCode::UNPROCESSABLE_ENTITY, "unsafe_url")
        );
    }
}
