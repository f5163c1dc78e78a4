use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who uploaded a batch of files and when. Captured once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInfo {
    pub time: DateTime<Utc>,
    pub client_agent: String,
}

/// One decoded multipart file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub contents: Bytes,
    pub upload: UploadInfo,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.contents.len()
    }
}

/// The validated output of the ingestor for a single request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub info: UploadInfo,
    pub files: Vec<UploadedFile>,
}

impl Upload {
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(UploadedFile::size).sum()
    }
}
