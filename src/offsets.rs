use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sidecar::{read_json, write_json_atomically};

/// Where reading resumes in one log file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCursor {
    pub offset: u64,
    /// First line of the file when the offset was committed. A different
    /// first line means the file was replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// Committed cursors per log file, persisted as a JSON object keyed by the
/// log's path.
#[derive(Debug, Default)]
pub struct OffsetBook {
    path: PathBuf,
    cursors: BTreeMap<String, LogCursor>,
}

impl OffsetBook {
    /// Loads the book at `path`; a missing file is an empty book.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cursors = read_json::<BTreeMap<String, LogCursor>>(&path)?.unwrap_or_default();
        Ok(Self { path, cursors })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor_for(&self, log_path: &Path) -> LogCursor {
        self.cursors
            .get(offset_key(log_path).as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn offset_for(&self, log_path: &Path) -> u64 {
        self.cursor_for(log_path).offset
    }

    /// Records `cursor` for `log_path` and rewrites the book on disk.
    pub fn commit(&mut self, log_path: &Path, cursor: LogCursor) -> Result<()> {
        let key = offset_key(log_path);
        if self.cursors.get(&key) == Some(&cursor) {
            return Ok(());
        }
        self.cursors.insert(key, cursor);
        write_json_atomically(&self.path, &self.cursors, "log offsets")
    }
}

fn offset_key(log_path: &Path) -> String {
    std::path::absolute(log_path)
        .unwrap_or_else(|_| log_path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{LogCursor, OffsetBook};
    use crate::sidecar::temporary_path;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_directory() -> std::path::PathBuf {
        let timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let process_id = std::process::id();
        std::env::temp_dir().join(format!("tacstats_offsets_test_{process_id}_{timestamp_nanos}"))
    }

    fn cursor(offset: u64) -> LogCursor {
        LogCursor {
            offset,
            header: Some("Log file open, 03/01/24 19:58:02".to_string()),
        }
    }

    #[test]
    fn missing_book_starts_every_file_at_zero() {
        let temp_directory = unique_temp_directory();
        let book = OffsetBook::load(temp_directory.join("offsets.json"))
            .expect("Expected missing book to load empty");

        assert_eq!(book.offset_for(&temp_directory.join("coop-east.log")), 0);
        assert!(!temp_directory.exists());
    }

    #[test]
    fn commits_survive_reload() {
        let temp_directory = unique_temp_directory();
        let book_path = temp_directory.join("state").join("offsets.json");
        let log_path = temp_directory.join("coop-east.log");

        let mut book = OffsetBook::load(&book_path).expect("Expected empty book");
        book.commit(&log_path, cursor(4096)).expect("Expected first commit");
        book.commit(&log_path, cursor(8192)).expect("Expected second commit");

        let reloaded = OffsetBook::load(&book_path).expect("Expected book to reload");
        assert_eq!(reloaded.offset_for(&log_path), 8192);
        assert_eq!(
            reloaded.cursor_for(&log_path).header.as_deref(),
            Some("Log file open, 03/01/24 19:58:02")
        );
        assert!(!book_path.with_file_name("offsets.json.tmp").exists());

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[test]
    fn rejects_corrupt_book() {
        let temp_directory = unique_temp_directory();
        std::fs::create_dir_all(&temp_directory).expect("Failed to create temp directory");
        let book_path = temp_directory.join("offsets.json");
        std::fs::write(&book_path, "{ not json").expect("Failed to write corrupt book");

        assert!(OffsetBook::load(&book_path).is_err());

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[test]
    fn leftover_temp_file_keeps_committed_offset() {
        let temp_directory = unique_temp_directory();
        let book_path = temp_directory.join("offsets.json");
        let log_path = temp_directory.join("coop-east.log");

        let mut book = OffsetBook::load(&book_path).expect("Expected empty book");
        book.commit(&log_path, cursor(4096)).expect("Expected commit");
        std::fs::write(temporary_path(&book_path), "{ \"interrupted\": ")
            .expect("Failed to write interrupted temp file");

        let mut reloaded = OffsetBook::load(&book_path).expect("Expected book to reload");
        assert_eq!(reloaded.offset_for(&log_path), 4096);

        reloaded
            .commit(&log_path, cursor(8192))
            .expect("Expected commit over leftover temp file");
        let reloaded = OffsetBook::load(&book_path).expect("Expected book to reload");
        assert_eq!(reloaded.offset_for(&log_path), 8192);
        assert!(!temporary_path(&book_path).exists());

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }
}
