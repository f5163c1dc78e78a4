use crate::AppState;
use crate::api::error::{AppError, ErrorBody};
use crate::services::archive::ArchiveStreamer;
use crate::services::ingestor::UploadIngestor;
use axum::{
    extract::{Request, State},
    http::header,
    response::{IntoResponse, Response},
};

const ARCHIVE_DISPOSITION: &str = "attachment; filename=\"archive.zip\"";

/// Bundle every uploaded file into a ZIP archive and record them in the store
#[utoipa::path(
    post,
    path = "/archive",
    request_body(
        content = Object,
        description = "One file part per entry; the part's field name is the entry name",
        content_type = "multipart/form-data"
    ),
    responses(
        (status = 200, description = "Streamed ZIP archive (application/zip)"),
        (status = 400, description = "Invalid upload", body = ErrorBody),
        (status = 500, description = "Archive or store failure", body = ErrorBody)
    ),
    tag = "archive"
)]
pub async fn post_archive(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let upload = UploadIngestor::new(&state.config.limits)
        .ingest(request)
        .await?;

    tracing::info!(
        "📦 Archiving {} files ({} bytes) for '{}'",
        upload.files.len(),
        upload.total_bytes(),
        upload.info.client_agent
    );

    let body = ArchiveStreamer::new(state.store.clone())
        .stream(upload.files)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (header::CONTENT_DISPOSITION, ARCHIVE_DISPOSITION),
        ],
        body,
    )
        .into_response())
}

pub async fn not_found(request: Request) -> AppError {
    AppError::NotFound(format!("no route for {}", request.uri().path()))
}
