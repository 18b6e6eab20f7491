pub mod aggregator;
pub mod commands;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod model;
pub mod offsets;
pub mod parser;
pub mod players;
pub mod recovery;
pub mod remote;
pub mod roster;
pub mod settings;
mod sidecar;
pub mod store;
pub mod tailer;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

pub use error::{RemoteError, Result, StatsError, StoreError};
pub use settings::StatsSettings;
pub use store::{MemoryStore, StatStore};
pub use worker::ServerWorker;

use offsets::OffsetBook;
use remote::{CommandChannel, TracingChannel};
use tailer::Tailer;

/// Runs ingestion over a snapshot-backed in-memory store, logging remote
/// commands instead of sending them.
pub async fn run(settings: StatsSettings, shutdown: watch::Receiver<bool>) -> Result<()> {
    let store = MemoryStore::open(settings.stats_path())?;
    run_with(settings, Arc::new(store), Arc::new(TracingChannel), shutdown).await
}

/// Runs ingestion with caller-provided collaborators until `shutdown` is set.
///
/// Committed offsets are only meaningful against a store that kept what was
/// read before them; pair a persisted offsets file with a durable store.
pub async fn run_with(
    settings: StatsSettings,
    store: Arc<dyn StatStore>,
    command_channel: Arc<dyn CommandChannel>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let offsets = OffsetBook::load(&settings.offsets_path)?;
    let display_names: HashMap<String, String> = settings
        .servers
        .iter()
        .map(|server| (server.id.clone(), server.name.clone()))
        .collect();

    Tailer::new(settings.log_directory.clone(), store, offsets)
        .with_command_channel(command_channel, settings.announce_joins)
        .with_display_names(display_names)
        .run(shutdown)
        .await
}
