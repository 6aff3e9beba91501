//! Admission checks for an upload. Pure apart from the injected clock and id source.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{Video, VideoStatus};

pub const MAX_UPLOAD_BYTES: u64 = 30 * 1024 * 1024;

pub const ALLOWED_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDescriptor {
    pub size_bytes: u64,
    pub file_name: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file exceeds the {limit_mib} MiB limit ({size_bytes} bytes)", limit_mib = MAX_UPLOAD_BYTES / (1024 * 1024))]
    PayloadTooLarge { size_bytes: u64 },

    #[error("unsupported video format: {0}")]
    UnsupportedFormat(String),

    #[error("owner id is required")]
    MissingOwner,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

pub struct UuidV4Generator;

impl IdGenerator for UuidV4Generator {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Suffix after the last `.`, matched case-sensitively against the allow-list.
pub fn allowed_extension(file_name: &str) -> Option<&str> {
    let (_, extension) = file_name.rsplit_once('.')?;
    ALLOWED_EXTENSIONS.contains(&extension).then_some(extension)
}

#[derive(Clone)]
pub struct UploadValidator {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl UploadValidator {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { clock, ids }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(UuidV4Generator))
    }

    /// Size first, then format, then owner. Returns a fresh `PENDING` item.
    pub fn validate(&self, upload: &UploadDescriptor, owner_id: &str) -> Result<Video, ValidationError> {
        if upload.size_bytes > MAX_UPLOAD_BYTES {
            return Err(ValidationError::PayloadTooLarge {
                size_bytes: upload.size_bytes,
            });
        }

        let extension = allowed_extension(&upload.file_name)
            .ok_or_else(|| ValidationError::UnsupportedFormat(upload.file_name.clone()))?;

        if owner_id.trim().is_empty() {
            return Err(ValidationError::MissingOwner);
        }

        let now = self.clock.now();
        Ok(Video {
            id: self.ids.next_id(),
            owner_id: owner_id.to_string(),
            file_name: upload.file_name.clone(),
            extension: extension.to_string(),
            size_bytes: upload.size_bytes as i64,
            status: VideoStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    struct FixedClock(OffsetDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            self.0
        }
    }

    struct FixedId(Uuid);

    impl IdGenerator for FixedId {
        fn next_id(&self) -> Uuid {
            self.0
        }
    }

    const MIB: u64 = 1024 * 1024;

    fn upload(size_bytes: u64, file_name: &str) -> UploadDescriptor {
        UploadDescriptor {
            size_bytes,
            file_name: file_name.to_string(),
            content_type: Some("video/mp4".to_string()),
        }
    }

    fn fixed() -> UploadValidator {
        UploadValidator::new(
            Arc::new(FixedClock(datetime!(2026-01-01 12:00 UTC))),
            Arc::new(FixedId(Uuid::from_u128(7))),
        )
    }

    #[test]
    fn valid_upload_becomes_pending_item() {
        let video = fixed().validate(&upload(5 * MIB, "video.mp4"), "u1").unwrap();

        assert_eq!(video.id, Uuid::from_u128(7));
        assert_eq!(video.owner_id, "u1");
        assert_eq!(video.file_name, "video.mp4");
        assert_eq!(video.extension, "mp4");
        assert_eq!(video.size_bytes, (5 * MIB) as i64);
        assert_eq!(video.status, VideoStatus::Pending);
        assert_eq!(video.created_at, datetime!(2026-01-01 12:00 UTC));
        assert_eq!(video.created_at, video.updated_at);
    }

    #[test]
    fn exactly_thirty_mib_is_accepted() {
        assert!(fixed().validate(&upload(MAX_UPLOAD_BYTES, "clip.webm"), "u1").is_ok());
    }

    #[test]
    fn oversized_rejected_regardless_of_format() {
        for name in ["video.mp4", "notes.txt", "noext", "clip.MKV"] {
            for size in [MAX_UPLOAD_BYTES + 1, 50 * MIB, u64::MAX] {
                assert_eq!(
                    fixed().validate(&upload(size, name), "u1"),
                    Err(ValidationError::PayloadTooLarge { size_bytes: size }),
                    "{} / {}",
                    name,
                    size
                );
            }
        }
    }

    #[test]
    fn unsupported_extension_rejected_regardless_of_size() {
        for name in ["notes.txt", "video.MP4", "video.mp4.exe", "mp4", "video.", "archive.mp4v"] {
            for size in [0, 1, 5 * MIB, MAX_UPLOAD_BYTES] {
                assert!(
                    matches!(
                        fixed().validate(&upload(size, name), "u1"),
                        Err(ValidationError::UnsupportedFormat(_))
                    ),
                    "{} / {}",
                    name,
                    size
                );
            }
        }
    }

    #[test]
    fn every_allowed_extension_passes() {
        for extension in ALLOWED_EXTENSIONS {
            let name = format!("movie.{}", extension);
            let video = fixed().validate(&upload(MIB, &name), "u1").unwrap();
            assert_eq!(video.extension, extension);
        }
    }

    #[test]
    fn extension_is_the_last_suffix() {
        assert_eq!(allowed_extension("my.holiday.mov"), Some("mov"));
        assert_eq!(allowed_extension("mov"), None);
    }

    #[test]
    fn blank_owner_rejected() {
        assert_eq!(
            fixed().validate(&upload(MIB, "video.mp4"), "   "),
            Err(ValidationError::MissingOwner)
        );
    }

    #[test]
    fn system_validator_issues_distinct_ids() {
        let validator = UploadValidator::system();
        let a = validator.validate(&upload(MIB, "a.mp4"), "u1").unwrap();
        let b = validator.validate(&upload(MIB, "a.mp4"), "u1").unwrap();
        assert_ne!(a.id, b.id);
    }
}
