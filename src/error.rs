use std::path::PathBuf;

/// Failures reported by a [`crate::store::StatStore`] implementation.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// A record that the caller expected to exist is missing.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A create call would violate a uniqueness rule.
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    /// The backing storage cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to persist store: {0}")]
    Persist(String),
}

/// Failures reported by the remote command channel or the query client.
#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("no command channel configured for server {0}")]
    UnknownServer(String),

    #[error("remote request failed: {0}")]
    Request(String),

    #[error("remote request timed out after {0} ms")]
    Timeout(u64),
}

/// Crate-level errors for the ingestion process (I/O, config, offsets).
#[derive(thiserror::Error, Debug)]
pub enum StatsError {
    #[error("failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize {context}: {source}")]
    Serialize {
        context: &'static str,
        source: serde_json::Error,
    },

    #[error("log watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StatsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StatsError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
