use crate::config::UploadLimits;
use crate::models::{Upload, UploadInfo, UploadedFile};
use crate::utils::limit::{LimitTrip, LimitedBody};
use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{HeaderMap, header};
use bytes::BytesMut;
use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    #[error("request body too large (limit {limit} bytes)")]
    RequestTooLarge { limit: u64 },

    #[error("file '{name}' exceeds max file size ({limit})")]
    FileTooLarge { name: String, limit: u64 },

    #[error("file '{name}' exceeds the multipart buffer ({limit})")]
    DecodeBufferExceeded { name: String, limit: u64 },

    #[error("no files provided")]
    NoFilesProvided,

    #[error("parsing multipart/form-data: {0}")]
    Decode(#[source] MultipartError),
}

impl IngestError {
    /// Errors caused by the client's input, answered with 400
    pub fn is_client_error(&self) -> bool {
        !matches!(self, IngestError::Decode(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            IngestError::InvalidContentType(_) => "invalid_content_type",
            IngestError::RequestTooLarge { .. } => "request_too_large",
            IngestError::FileTooLarge { .. } => "file_too_large",
            IngestError::DecodeBufferExceeded { .. } => "decode_buffer_exceeded",
            IngestError::NoFilesProvided => "no_files",
            IngestError::Decode(_) => "internal",
        }
    }
}

/// Turns a multipart request into a bounded list of in-memory files.
///
/// Nothing is written anywhere; the only side effect is consuming the body.
pub struct UploadIngestor<'a> {
    limits: &'a UploadLimits,
}

impl<'a> UploadIngestor<'a> {
    pub fn new(limits: &'a UploadLimits) -> Self {
        Self { limits }
    }

    pub async fn ingest(&self, request: Request) -> Result<Upload, IngestError> {
        check_content_type(request.headers())?;

        let info = UploadInfo {
            time: Utc::now(),
            client_agent: request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
        };

        let limit = self.limits.max_request_bytes;
        if declared_length(request.headers()).is_some_and(|len| len > limit) {
            return Err(IngestError::RequestTooLarge { limit });
        }

        // Enforce the request ceiling on the raw body, below the multipart decoder
        let (parts, body) = request.into_parts();
        let (limited, trip) = LimitedBody::new(body.into_data_stream(), limit);
        let request = Request::from_parts(parts, Body::from_stream(limited));

        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| IngestError::InvalidContentType(e.body_text()))?;

        let mut files = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| self.decode_error(e, &trip))?
        {
            let Some(name) = part_name(&field) else {
                self.drain(field, &trip).await?;
                continue;
            };

            let contents = self.read_file(&name, field, &trip).await?;
            tracing::debug!("Decoded part '{}' ({} bytes)", name, contents.len());
            files.push(UploadedFile {
                name,
                contents,
                upload: info.clone(),
            });
        }

        if files.is_empty() {
            return Err(IngestError::NoFilesProvided);
        }

        Ok(Upload { info, files })
    }

    async fn read_file(
        &self,
        name: &str,
        mut field: Field<'_>,
        trip: &LimitTrip,
    ) -> Result<bytes::Bytes, IngestError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| self.decode_error(e, trip))? {
            let len = (buffer.len() + chunk.len()) as u64;
            if len > self.limits.max_file_bytes {
                return Err(IngestError::FileTooLarge {
                    name: name.to_string(),
                    limit: self.limits.max_file_bytes,
                });
            }
            if len > self.limits.max_decode_buffer_bytes {
                return Err(IngestError::DecodeBufferExceeded {
                    name: name.to_string(),
                    limit: self.limits.max_decode_buffer_bytes,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Plain form fields are read and discarded; they still count against the request ceiling.
    async fn drain(&self, mut field: Field<'_>, trip: &LimitTrip) -> Result<(), IngestError> {
        while field
            .chunk()
            .await
            .map_err(|e| self.decode_error(e, trip))?
            .is_some()
        {}
        Ok(())
    }

    fn decode_error(&self, error: MultipartError, trip: &LimitTrip) -> IngestError {
        if trip.is_tripped() {
            IngestError::RequestTooLarge {
                limit: self.limits.max_request_bytes,
            }
        } else {
            IngestError::Decode(error)
        }
    }
}

/// File parts are named by their form field, falling back to the file name.
/// Parts without a file name are plain form fields and yield `None`.
fn part_name(field: &Field<'_>) -> Option<String> {
    let file_name = field.file_name()?;
    let name = field
        .name()
        .filter(|n| !n.is_empty())
        .unwrap_or(file_name);
    (!name.is_empty()).then(|| name.to_string())
}

fn check_content_type(headers: &HeaderMap) -> Result<(), IngestError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .ok_or_else(|| IngestError::InvalidContentType("missing content-type header".to_string()))?
        .to_str()
        .map_err(|_| IngestError::InvalidContentType("unreadable content-type header".to_string()))?;

    let mime: mime::Mime = raw
        .parse()
        .map_err(|_| IngestError::InvalidContentType(format!("malformed content-type '{}'", raw)))?;

    if mime.essence_str() != mime::MULTIPART_FORM_DATA.essence_str() {
        return Err(IngestError::InvalidContentType(format!(
            "expected multipart/form-data, got '{}'",
            mime.essence_str()
        )));
    }
    if mime.get_param(mime::BOUNDARY).is_none() {
        return Err(IngestError::InvalidContentType(
            "missing multipart boundary".to_string(),
        ));
    }
    Ok(())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
