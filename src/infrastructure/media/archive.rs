use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use super::error::{TransformError, TransformResult};
use super::Frame;

const COMPRESSION_LEVEL: i64 = 9;

/// Zips `frames` in the given order.
///
/// Entries get a fixed timestamp and mode so equal input always yields
/// byte-identical archives.
pub fn pack_frames(frames: &[Frame]) -> TransformResult<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut seen = HashSet::with_capacity(frames.len());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for frame in frames {
        check_entry_name(&frame.name)?;
        if !seen.insert(frame.name.as_str()) {
            return Err(TransformError::InvalidFrameName(format!("duplicate entry '{}'", frame.name)));
        }

        writer.start_file(frame.name.as_str(), options)?;
        writer.write_all(&frame.data)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn check_entry_name(name: &str) -> TransformResult<()> {
    let unsafe_name = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == "..";
    if unsafe_name {
        return Err(TransformError::InvalidFrameName(name.to_string()));
    }
    Ok(())
}
