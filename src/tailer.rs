use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, StatsError};
use crate::model::{server_id_for_log_path, Server};
use crate::offsets::{LogCursor, OffsetBook};
use crate::remote::{CommandChannel, Notifier};
use crate::store::StatStore;
use crate::worker::ServerWorker;

pub const DEFAULT_SAFETY_POLL_INTERVAL: Duration = Duration::from_secs(30);

const SERVER_LOG_EXTENSION: &str = ".log";
const BACKUP_LOG_MARKER: &str = "-backup-";

/// Complete lines read past a committed offset.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LineBatch {
    pub lines: Vec<String>,
    pub next_offset: u64,
    /// The file was shorter than the offset and was read from the start.
    pub truncated: bool,
}

struct LogFollower {
    wake_sender: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Watches a log directory and runs one worker task per server log.
pub struct Tailer {
    log_directory: PathBuf,
    store: Arc<dyn StatStore>,
    offsets: Arc<Mutex<OffsetBook>>,
    command_channel: Option<Arc<dyn CommandChannel>>,
    announce_joins: bool,
    display_names: HashMap<String, String>,
    poll_interval: Duration,
}

impl Tailer {
    pub fn new(log_directory: PathBuf, store: Arc<dyn StatStore>, offsets: OffsetBook) -> Self {
        Self {
            log_directory,
            store,
            offsets: Arc::new(Mutex::new(offsets)),
            command_channel: None,
            announce_joins: false,
            display_names: HashMap::new(),
            poll_interval: DEFAULT_SAFETY_POLL_INTERVAL,
        }
    }

    pub fn with_command_channel(
        mut self,
        command_channel: Arc<dyn CommandChannel>,
        announce_joins: bool,
    ) -> Self {
        self.command_channel = Some(command_channel);
        self.announce_joins = announce_joins;
        self
    }

    pub fn with_display_names(mut self, display_names: HashMap<String, String>) -> Self {
        self.display_names = display_names;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Follows every server log until `shutdown` flips to true, then waits
    /// for each worker to finish its current batch.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (notify_sender, mut notify_receiver) =
            mpsc::unbounded_channel::<std::result::Result<Event, notify::Error>>();

        let mut watcher = notify::recommended_watcher(move |result| {
            if notify_sender.send(result).is_err() {
                tracing::debug!("Log directory notification receiver dropped");
            }
        })?;
        watcher.watch(&self.log_directory, RecursiveMode::NonRecursive)?;

        tracing::info!(log_directory = %self.log_directory.display(), "Watching server logs");

        let mut followers: HashMap<String, LogFollower> = HashMap::new();
        for log_path in list_server_logs(&self.log_directory)? {
            self.follow(&mut followers, &log_path, &shutdown);
        }

        loop {
            tokio::select! {
                notification = notify_receiver.recv() => {
                    let Some(notification) = notification else {
                        break;
                    };
                    match notification {
                        Ok(event) if is_relevant_notification(&event) => {
                            for path in &event.paths {
                                self.wake_or_follow(&mut followers, path, &shutdown);
                            }
                        }
                        Ok(_) => {}
                        Err(error) => {
                            tracing::warn!(error = %error, "Log directory watcher error");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(watcher);
        tracing::info!(worker_count = followers.len(), "Stopping server workers");

        for (server_id, follower) in followers {
            drop(follower.wake_sender);
            if let Err(error) = follower.handle.await {
                tracing::error!(server_id = %server_id, error = %error, "Server worker task failed");
            }
        }

        Ok(())
    }

    fn wake_or_follow(
        &self,
        followers: &mut HashMap<String, LogFollower>,
        path: &Path,
        shutdown: &watch::Receiver<bool>,
    ) {
        let Some(file_name) = path.file_name().and_then(|value| value.to_str()) else {
            return;
        };
        if !is_server_log_file_name(file_name) {
            return;
        }

        let Some(server_id) = server_id_for_log_path(path) else {
            return;
        };
        match followers.get(&server_id) {
            Some(follower) => wake_follower(&follower.wake_sender, &server_id),
            None => {
                let log_path = self.log_directory.join(file_name);
                self.follow(followers, &log_path, shutdown);
            }
        }
    }

    fn follow(
        &self,
        followers: &mut HashMap<String, LogFollower>,
        log_path: &Path,
        shutdown: &watch::Receiver<bool>,
    ) {
        let Some(server_id) = server_id_for_log_path(log_path) else {
            return;
        };
        if followers.contains_key(&server_id) {
            return;
        }

        let display_name = self.display_names.get(&server_id).map(String::as_str);
        let Some(server) = Server::from_log_path(log_path.to_path_buf(), display_name) else {
            return;
        };

        let mut worker = match ServerWorker::start(server, Arc::clone(&self.store)) {
            Ok(worker) => worker,
            Err(error) => {
                tracing::error!(
                    server_id = %server_id,
                    error = %error,
                    "Failed to start server worker"
                );
                return;
            }
        };
        if let Some(command_channel) = self.command_channel.as_ref() {
            worker = worker.with_notifier(
                Notifier::new(server_id.clone(), Arc::clone(command_channel)),
                self.announce_joins,
            );
        }

        let cursor = match self.offsets.lock() {
            Ok(book) => book.cursor_for(log_path),
            Err(error) => {
                tracing::error!(server_id = %server_id, error = %error, "Offset book unavailable");
                return;
            }
        };

        let (wake_sender, wake_receiver) = mpsc::channel(1);
        let handle = tokio::spawn(follow_log(
            worker,
            Arc::clone(&self.offsets),
            cursor,
            wake_receiver,
            shutdown.clone(),
            self.poll_interval,
        ));

        followers.insert(
            server_id,
            LogFollower {
                wake_sender,
                handle,
            },
        );
    }
}

/// Queues at most one wake-up; a follower that is already due to read picks
/// up every write made before it runs.
fn wake_follower(wake_sender: &mpsc::Sender<()>, server_id: &str) {
    match wake_sender.try_send(()) {
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
        Err(mpsc::error::TrySendError::Closed(())) => {
            tracing::debug!(server_id = %server_id, "Server worker already stopped");
        }
    }
}

async fn follow_log(
    mut worker: ServerWorker,
    offsets: Arc<Mutex<OffsetBook>>,
    mut cursor: LogCursor,
    mut wake_receiver: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            woke = wake_receiver.recv() => {
                if woke.is_none() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        ingest_new_lines(&mut worker, &offsets, &mut cursor);
    }

    tracing::info!(
        server_id = %worker.server().id,
        file_offset = cursor.offset,
        "Server worker stopped"
    );
}

/// Reads, applies and commits whatever complete lines are past the cursor.
///
/// The store is flushed before the offset is committed, so a crash between
/// the two replays the batch rather than losing it.
fn ingest_new_lines(worker: &mut ServerWorker, offsets: &Mutex<OffsetBook>, cursor: &mut LogCursor) {
    let log_path = worker.server().log_path.clone();
    let header = match read_header_line(&log_path) {
        Ok(header) => header,
        Err(error) => {
            tracing::warn!(
                server_id = %worker.server().id,
                error = %error,
                "Failed to read server log"
            );
            return;
        }
    };

    let mut start_offset = cursor.offset;
    if start_offset > 0 && is_replaced_log(cursor.header.as_deref(), header.as_deref()) {
        tracing::info!(
            server_id = %worker.server().id,
            previous_offset = start_offset,
            "Server log was replaced; reading from the start"
        );
        start_offset = 0;
    }

    let batch = match read_complete_lines(&log_path, start_offset) {
        Ok(batch) => batch,
        Err(error) => {
            tracing::warn!(
                server_id = %worker.server().id,
                error = %error,
                "Failed to read server log"
            );
            return;
        }
    };

    if batch.truncated {
        tracing::info!(
            server_id = %worker.server().id,
            previous_offset = start_offset,
            "Server log shrank; reading from the start"
        );
    }

    let header = header.or_else(|| {
        if batch.truncated || start_offset == 0 {
            batch.lines.first().cloned()
        } else {
            None
        }
    });
    let next_cursor = LogCursor {
        offset: batch.next_offset,
        header,
    };
    if next_cursor == *cursor && batch.lines.is_empty() {
        return;
    }

    worker.process_batch(&batch.lines);
    *cursor = next_cursor.clone();

    if let Err(error) = worker.flush() {
        tracing::error!(
            server_id = %worker.server().id,
            file_offset = next_cursor.offset,
            error = %error,
            "Failed to persist stats; leaving log offset uncommitted"
        );
        return;
    }

    let commit_result = offsets
        .lock()
        .map_err(|error| StatsError::Config(format!("offset book lock poisoned: {error}")))
        .and_then(|mut book| book.commit(&log_path, next_cursor));
    if let Err(error) = commit_result {
        tracing::error!(
            server_id = %worker.server().id,
            file_offset = cursor.offset,
            error = %error,
            "Failed to commit log offset"
        );
    }
}

/// A log is replaced when its first line differs from the one recorded with
/// the committed offset.
fn is_replaced_log(committed_header: Option<&str>, current_header: Option<&str>) -> bool {
    match (committed_header, current_header) {
        (Some(committed_header), Some(current_header)) => committed_header != current_header,
        _ => false,
    }
}

/// First complete line of the file, if it has one yet.
pub fn read_header_line(log_path: &Path) -> Result<Option<String>> {
    let file = File::open(log_path).map_err(|error| StatsError::io(log_path, error))?;
    let mut reader = BufReader::new(file);
    let mut line_bytes = Vec::new();
    reader
        .read_until(b'\n', &mut line_bytes)
        .map_err(|error| StatsError::io(log_path, error))?;
    if line_bytes.last() != Some(&b'\n') {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&line_bytes);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Reads every newline-terminated line after `file_offset`.
///
/// A trailing line without its newline is left for the next read. When the
/// file is shorter than the offset it was truncated or replaced, and reading
/// restarts at 0.
pub fn read_complete_lines(log_path: &Path, file_offset: u64) -> Result<LineBatch> {
    let mut file = File::open(log_path).map_err(|error| StatsError::io(log_path, error))?;
    let file_length = file
        .metadata()
        .map_err(|error| StatsError::io(log_path, error))?
        .len();

    let truncated = file_length < file_offset;
    let start_offset = if truncated { 0 } else { file_offset };
    file.seek(SeekFrom::Start(start_offset))
        .map_err(|error| StatsError::io(log_path, error))?;

    let mut reader = BufReader::new(file);
    let mut line_bytes = Vec::new();
    let mut batch = LineBatch {
        lines: Vec::new(),
        next_offset: start_offset,
        truncated,
    };

    loop {
        line_bytes.clear();
        let bytes_read = reader
            .read_until(b'\n', &mut line_bytes)
            .map_err(|error| StatsError::io(log_path, error))?;
        if bytes_read == 0 || line_bytes.last() != Some(&b'\n') {
            break;
        }

        batch.next_offset = batch.next_offset.saturating_add(bytes_read as u64);
        let line = String::from_utf8_lossy(&line_bytes);
        batch
            .lines
            .push(line.trim_end_matches(['\r', '\n']).to_string());
    }

    Ok(batch)
}

pub fn is_server_log_file_name(file_name: &str) -> bool {
    file_name.ends_with(SERVER_LOG_EXTENSION) && !file_name.contains(BACKUP_LOG_MARKER)
}

fn list_server_logs(log_directory: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(log_directory).map_err(|error| StatsError::io(log_directory, error))?;

    let mut log_paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| StatsError::io(log_directory, error))?;
        let path = entry.path();
        let is_file = entry
            .file_type()
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        let Some(file_name) = path.file_name().and_then(|value| value.to_str()) else {
            continue;
        };

        if is_file && is_server_log_file_name(file_name) {
            log_paths.push(path);
        }
    }

    log_paths.sort();
    Ok(log_paths)
}

fn is_relevant_notification(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

#[cfg(test)]
mod tests {
    use super::{
        ingest_new_lines, is_server_log_file_name, list_server_logs, read_complete_lines, wake_follower, Server,
        ServerWorker, Tailer,
    };
    use crate::offsets::{LogCursor, OffsetBook};
    use crate::store::{MatchFilter, MemoryStore, StatStore};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::sync::{mpsc, watch};

    fn unique_temp_directory() -> std::path::PathBuf {
        let timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let process_id = std::process::id();
        std::env::temp_dir().join(format!("tacstats_tailer_test_{process_id}_{timestamp_nanos}"))
    }

    fn build_line(body: &str) -> String {
        format!("[2024.03.01-20.15.11:427][412]{body}\n")
    }

    #[test]
    fn leaves_partial_trailing_line_for_next_read() {
        let temp_directory = unique_temp_directory();
        std::fs::create_dir_all(&temp_directory).expect("Failed to create temp directory");
        let log_path = temp_directory.join("coop-east.log");

        let first_line = build_line("LogNet: Join succeeded: Alpha");
        std::fs::write(&log_path, format!("{first_line}[2024.03.01-20.15.12:000][413]LogNet: Join succ"))
            .expect("Failed to write test log");

        let batch = read_complete_lines(&log_path, 0).expect("Expected first read");
        assert_eq!(batch.lines.len(), 1);
        assert_eq!(batch.next_offset, first_line.len() as u64);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .expect("Failed to reopen test log");
        file.write_all(b"eeded: Bravo\r\n").expect("Failed to append");

        let batch = read_complete_lines(&log_path, batch.next_offset).expect("Expected second read");
        assert_eq!(
            batch.lines,
            vec!["[2024.03.01-20.15.12:000][413]LogNet: Join succeeded: Bravo".to_string()]
        );
        assert!(!batch.truncated);

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[test]
    fn rereads_truncated_file_from_start() {
        let temp_directory = unique_temp_directory();
        std::fs::create_dir_all(&temp_directory).expect("Failed to create temp directory");
        let log_path = temp_directory.join("coop-east.log");
        std::fs::write(&log_path, build_line("LogNet: Join succeeded: Alpha"))
            .expect("Failed to write test log");

        let batch = read_complete_lines(&log_path, 4096).expect("Expected read");
        assert!(batch.truncated);
        assert_eq!(batch.lines.len(), 1);

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[test]
    fn replaced_log_longer_than_offset_is_read_from_start() {
        let temp_directory = unique_temp_directory();
        std::fs::create_dir_all(&temp_directory).expect("Failed to create temp directory");
        let log_path = temp_directory.join("coop-east.log");
        std::fs::write(
            &log_path,
            [
                "Log file open, 03/01/24 19:58:02\n".to_string(),
                build_line("LogLoad: LoadMap: /Game/Maps/Town/Town?Scenario=Scenario_Hideout_Checkpoint_Security"),
            ]
            .concat(),
        )
        .expect("Failed to write first log");

        let store = Arc::new(MemoryStore::new());
        let server = Server::from_log_path(log_path.clone(), None).expect("Expected server");
        let mut worker = ServerWorker::start(server, store.clone()).expect("Expected worker");
        let offsets = Mutex::new(
            OffsetBook::load(temp_directory.join("offsets.json")).expect("Expected empty offsets"),
        );
        let mut cursor = LogCursor::default();

        ingest_new_lines(&mut worker, &offsets, &mut cursor);
        assert_eq!(cursor.header.as_deref(), Some("Log file open, 03/01/24 19:58:02"));
        let first_offset = cursor.offset;

        std::fs::write(
            &log_path,
            [
                "Log file open, 03/01/24 22:10:45\n".to_string(),
                build_line("LogLoad: LoadMap: /Game/Maps/Ministry/Ministry?Scenario=Scenario_Ministry_Checkpoint_Insurgents"),
                build_line("LogNet: some unrelated chatter"),
            ]
            .concat(),
        )
        .expect("Failed to write replacement log");
        assert!(
            std::fs::metadata(&log_path)
                .expect("Expected replacement log")
                .len()
                > first_offset
        );

        ingest_new_lines(&mut worker, &offsets, &mut cursor);

        assert_eq!(cursor.header.as_deref(), Some("Log file open, 03/01/24 22:10:45"));
        let active = worker.active_match().expect("Expected active match");
        assert_eq!(active.map.as_deref(), Some("Ministry"));
        let committed = offsets
            .lock()
            .expect("Expected offsets lock")
            .cursor_for(&log_path);
        assert_eq!(committed, cursor);

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[test]
    fn burst_of_notifications_queues_one_wake_up() {
        let (wake_sender, mut wake_receiver) = mpsc::channel(1);
        for _ in 0..5 {
            wake_follower(&wake_sender, "coop-east");
        }

        assert!(wake_receiver.try_recv().is_ok());
        assert!(wake_receiver.try_recv().is_err());

        drop(wake_receiver);
        wake_follower(&wake_sender, "coop-east");
    }

    #[test]
    fn ignores_backups_and_other_files() {
        assert!(is_server_log_file_name("coop-east.log"));
        assert!(!is_server_log_file_name("coop-east-backup-2024.03.01-20.00.00.log"));
        assert!(!is_server_log_file_name("coop-east.txt"));

        let temp_directory = unique_temp_directory();
        std::fs::create_dir_all(temp_directory.join("nested.log"))
            .expect("Failed to create temp directory");
        std::fs::write(temp_directory.join("coop-west.log"), "").expect("Failed to write log");
        std::fs::write(temp_directory.join("notes.txt"), "").expect("Failed to write notes");

        let log_paths = list_server_logs(&temp_directory).expect("Expected listing");
        assert_eq!(log_paths, vec![temp_directory.join("coop-west.log")]);

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn follows_existing_logs_and_commits_offsets() {
        let temp_directory = unique_temp_directory();
        let log_directory = temp_directory.join("logs");
        std::fs::create_dir_all(&log_directory).expect("Failed to create log directory");
        let log_path = log_directory.join("coop-east.log");
        let content = [
            build_line("LogLoad: LoadMap: /Game/Maps/Town/Town?Scenario=Scenario_Hideout_Checkpoint_Security"),
            build_line("LogGameplayEvents: Display: Alpha[76561198000000001, team 0] killed Rifleman[INVALID, team 1] with BP_Firearm_AKM_C_123456"),
        ]
        .concat();
        std::fs::write(&log_path, &content).expect("Failed to write test log");

        let offsets_path = temp_directory.join("offsets.json");
        let store = Arc::new(MemoryStore::new());
        let offsets = OffsetBook::load(&offsets_path).expect("Expected empty offsets");
        let tailer = Tailer::new(log_directory.clone(), store.clone(), offsets)
            .with_poll_interval(Duration::from_millis(50));

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let handle = tokio::spawn(tailer.run(shutdown_receiver));

        let mut committed = 0;
        for _ in 0..100 {
            committed = OffsetBook::load(&offsets_path)
                .map(|book| book.offset_for(&log_path))
                .unwrap_or(0);
            if committed == content.len() as u64 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(committed, content.len() as u64);

        shutdown_sender.send(true).expect("Expected tailer to listen");
        handle
            .await
            .expect("Expected tailer task to join")
            .expect("Expected tailer to stop cleanly");

        let matches = store
            .find_matches(&MatchFilter::for_server("coop-east"))
            .expect("Expected match query");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].map.as_deref(), Some("Town"));

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }
}
