use crate::services::archive::ArchiveError;
use crate::services::ingestor::IngestError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// JSON body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable reason
    #[schema(example = "no files provided")]
    pub error: String,
    /// Machine-readable error code
    #[schema(example = "no_files")]
    pub code: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Upload rejected: {0}")]
    Ingest(#[from] IngestError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Not Found: {0}")]
    NotFound(String),
}

const INTERNAL_MESSAGE: &str = "Internal Server Error";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            AppError::Ingest(e) if e.is_client_error() => {
                tracing::warn!("Rejected upload: {}", e);
                (StatusCode::BAD_REQUEST, e.to_string(), e.code())
            }
            AppError::Ingest(e) => {
                tracing::error!("Failed to decode upload: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_MESSAGE.to_string(),
                    "internal",
                )
            }
            AppError::Archive(e) => {
                tracing::error!("Archive error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_MESSAGE.to_string(),
                    "internal",
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found"),
        };

        let body = Json(ErrorBody {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
