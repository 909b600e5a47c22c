//! Single-entry zip extraction.

use std::io::{Cursor, Read};

use crate::error::{UpdateError, UpdateResult};

fn format_error(e: impl std::fmt::Display) -> UpdateError {
    UpdateError::ArchiveFormat {
        message: e.to_string(),
    }
}

/// Extract the only file of an in-memory zip archive.
///
/// Directory entries are ignored; any other file count is an error.
pub fn extract_single_entry(data: &[u8]) -> UpdateResult<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(format_error)?;

    let mut files = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(format_error)?;
        if !entry.is_dir() {
            files.push(index);
        }
    }

    let [index] = files[..] else {
        return Err(UpdateError::ArchiveFormat {
            message: format!("expected exactly one file in archive, found {}", files.len()),
        });
    };

    let mut entry = archive.by_index(index).map_err(format_error)?;
    let declared = entry.size();
    tracing::debug!("Extracting {} ({} bytes declared)", entry.name(), declared);

    // The declared size comes from the archive and is not trusted for allocation
    let mut payload = Vec::new();
    entry.read_to_end(&mut payload).map_err(format_error)?;

    if payload.len() as u64 != declared {
        return Err(UpdateError::ArchiveFormat {
            message: format!(
                "entry declares {} bytes but holds {}",
                declared,
                payload.len()
            ),
        });
    }
    Ok(payload)
}
