use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use vanishling_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The request is missing something it needs (a header, the `file` field).
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("journal error: {0}")]
    Journal(#[from] vanishling_journal::JournalError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Multipart(e) => e.status(),
            Self::Store(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Journal(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vanishling_types::FileId;

    #[test]
    fn status_mapping() {
        let id = FileId::from_digest([0xab; 32]);
        let cases = [
            (ServerError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (StoreError::InvalidInput("x".into()).into(), StatusCode::BAD_REQUEST),
            (StoreError::NotFound(id.clone()).into(), StatusCode::BAD_REQUEST),
            (StoreError::AlreadyExists(id).into(), StatusCode::INTERNAL_SERVER_ERROR),
            (
                StoreError::ResourceExhausted { usage_percent: 95, threshold_percent: 90 }.into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StoreError::StorageUnavailable {
                    path: PathBuf::from("/nope"),
                    source: std::io::Error::other("read-only"),
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }
}
