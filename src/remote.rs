use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Sends an administrative command to a running game server.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn send(&self, server_id: &str, command: &str) -> Result<String, RemoteError>;
}

/// One row of a server query response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerScore {
    pub name: String,
    pub score: i32,
}

/// Reads the live player list from a game server's query port.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query_players(&self, address: &str) -> Result<Vec<PlayerScore>, RemoteError>;
}

/// Command channel that only writes the command to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChannel;

#[async_trait]
impl CommandChannel for TracingChannel {
    async fn send(&self, server_id: &str, command: &str) -> Result<String, RemoteError> {
        tracing::info!(server_id = %server_id, command = %command, "Remote command");
        Ok(String::new())
    }
}

/// Fire-and-forget sender bound to one server.
///
/// Each command runs on its own task; a failed send is logged and dropped,
/// so ingestion never waits on the remote side.
#[derive(Clone)]
pub struct Notifier {
    server_id: String,
    channel: Arc<dyn CommandChannel>,
}

impl Notifier {
    pub fn new(server_id: impl Into<String>, channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            server_id: server_id.into(),
            channel,
        }
    }

    pub fn say(&self, message: &str) {
        self.send(format!("say {message}"));
    }

    pub fn send(&self, command: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                server_id = %self.server_id,
                command = %command,
                "No async runtime; dropping remote command"
            );
            return;
        };

        let server_id = self.server_id.clone();
        let channel = Arc::clone(&self.channel);
        runtime.spawn(async move {
            if let Err(error) = channel.send(&server_id, &command).await {
                tracing::warn!(
                    server_id = %server_id,
                    command = %command,
                    error = %error,
                    "Failed to send remote command"
                );
            }
        });
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Notifier")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}
