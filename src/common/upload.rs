use axum::extract::multipart::{Field, Multipart, MultipartError};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::modules::video::validator::UploadDescriptor;

pub const FILE_FIELD: &str = "file";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No '{0}' field found in multipart request")]
    MissingField(&'static str),

    #[error("Upload has no file name")]
    MissingFileName,

    #[error("Stream interrupted: {0}")]
    Stream(#[from] MultipartError),
}

/// A multipart file read into memory, at most `limit` bytes of it.
///
/// `descriptor.size_bytes` is the number of bytes seen, so an oversized
/// upload still reports a size above `limit` without being buffered whole.
#[derive(Debug)]
pub struct BufferedUpload {
    pub descriptor: UploadDescriptor,
    pub body: Bytes,
}

/// Last path segment of a client-supplied file name.
pub fn base_name(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim()
}

pub async fn read_file_field(multipart: &mut Multipart, limit: u64) -> Result<BufferedUpload, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            return read_capped(field, limit).await;
        }
    }
    Err(UploadError::MissingField(FILE_FIELD))
}

async fn read_capped(mut field: Field<'_>, limit: u64) -> Result<BufferedUpload, UploadError> {
    let file_name = field
        .file_name()
        .map(base_name)
        .filter(|name| !name.is_empty())
        .ok_or(UploadError::MissingFileName)?
        .to_string();

    let content_type = field
        .content_type()
        .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
        .map(str::to_string)
        .or_else(|| {
            mime_guess::from_path(&file_name)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });

    let mut body = BytesMut::new();
    let mut seen: u64 = 0;

    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        seen += chunk.len() as u64;

        if seen > limit {
            warn!(file_name = %file_name, limit, "Upload exceeds limit, stopped reading");
            break;
        }
        body.extend_from_slice(&chunk);
    }

    debug!(file_name = %file_name, bytes = seen, "Upload buffered");

    Ok(BufferedUpload {
        descriptor: UploadDescriptor {
            size_bytes: seen,
            file_name,
            content_type,
        },
        body: body.freeze(),
    })
}
