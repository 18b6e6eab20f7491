use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StatsError};

/// Reads a JSON sidecar; a missing file is `None`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw_json = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(StatsError::io(path, error)),
    };

    serde_json::from_str::<T>(&raw_json)
        .map(Some)
        .map_err(|source| StatsError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `value` next to `path` and renames it over `path`, so readers see
/// either the old file or the new one.
pub(crate) fn write_json_atomically<T: Serialize>(
    path: &Path,
    value: &T,
    context: &'static str,
) -> Result<()> {
    if let Some(parent_directory) = path.parent().filter(|value| !value.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent_directory)
            .map_err(|error| StatsError::io(parent_directory, error))?;
    }

    let serialized = serde_json::to_string_pretty(value)
        .map_err(|source| StatsError::Serialize { context, source })?;

    let temp_path = temporary_path(path);
    let written = write_synced(&temp_path, serialized.as_bytes())
        .and_then(|()| std::fs::rename(&temp_path, path).map_err(|error| StatsError::io(path, error)));

    if written.is_err() {
        if let Err(cleanup_error) = std::fs::remove_file(&temp_path) {
            if cleanup_error.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    temp_path = %temp_path.display(),
                    context,
                    error = %cleanup_error,
                    "Failed to clean up temporary sidecar file"
                );
            }
        }
    }

    written
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|error| StatsError::io(path, error))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|error| StatsError::io(path, error))
}

pub(crate) fn temporary_path(path: &Path) -> PathBuf {
    let Some(file_name) = path.file_name().and_then(|value| value.to_str()) else {
        return path.with_extension("json.tmp");
    };

    path.with_file_name(format!("{file_name}.tmp"))
}
