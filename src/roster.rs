use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::remote::{PlayerScore, QueryClient};
use crate::settings::ServerSettings;

pub const DEFAULT_ROSTER_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Starts one poller per server that has a query address and returns the
/// roster receivers keyed by server id.
pub fn spawn_roster_pollers(
    servers: &[ServerSettings],
    client: Arc<dyn QueryClient>,
    poll_interval: Duration,
    shutdown: &watch::Receiver<bool>,
) -> HashMap<String, watch::Receiver<Vec<PlayerScore>>> {
    let mut rosters = HashMap::new();
    for server in servers {
        let Some(address) = server.query_address.clone() else {
            continue;
        };
        let (roster_sender, roster_receiver) = watch::channel(Vec::new());
        tokio::spawn(poll_roster(
            Arc::clone(&client),
            server.id.clone(),
            address,
            poll_interval,
            roster_sender,
            shutdown.clone(),
        ));
        rosters.insert(server.id.clone(), roster_receiver);
    }
    rosters
}

/// Polls a server's query port and publishes each roster until shutdown.
///
/// Query failures are logged and the previous roster stays published.
pub async fn poll_roster(
    client: Arc<dyn QueryClient>,
    server_id: String,
    address: String,
    poll_interval: Duration,
    roster_sender: watch::Sender<Vec<PlayerScore>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(server_id = %server_id, address = %address, "Roster polling started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match client.query_players(&address).await {
            Ok(players) => {
                tracing::debug!(
                    server_id = %server_id,
                    player_count = players.len(),
                    "Roster updated"
                );
                roster_sender.send_replace(players);
            }
            Err(error) => {
                tracing::warn!(
                    server_id = %server_id,
                    address = %address,
                    error = %error,
                    "Failed to query roster"
                );
            }
        }
    }

    tracing::info!(server_id = %server_id, "Roster polling stopped");
}

#[cfg(test)]
mod tests {
    use super::{poll_roster, spawn_roster_pollers};
    use crate::error::RemoteError;
    use crate::remote::{PlayerScore, QueryClient};
    use crate::settings::ServerSettings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    struct ScriptedClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryClient for ScriptedClient {
        async fn query_players(&self, address: &str) -> Result<Vec<PlayerScore>, RemoteError> {
            assert_eq!(address, "127.0.0.1:27131");
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                return Err(RemoteError::Timeout(500));
            }
            Ok(vec![PlayerScore {
                name: "Alpha".to_string(),
                score: 120 + call as i32,
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_roster_after_failed_query_and_stops_on_shutdown() {
        let client = Arc::new(ScriptedClient {
            calls: AtomicUsize::new(0),
        });
        let (roster_sender, mut roster_receiver) = watch::channel(Vec::new());
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        let handle = tokio::spawn(poll_roster(
            client.clone(),
            "coop-east".to_string(),
            "127.0.0.1:27131".to_string(),
            Duration::from_secs(30),
            roster_sender,
            shutdown_receiver,
        ));

        roster_receiver
            .changed()
            .await
            .expect("Expected a roster update");
        let roster = roster_receiver.borrow_and_update().clone();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "Alpha");
        assert!(client.calls.load(Ordering::SeqCst) >= 2);

        shutdown_sender.send(true).expect("Expected poller to listen");
        handle.await.expect("Expected poller to stop cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn spawns_pollers_only_for_servers_with_query_address() {
        let client = Arc::new(ScriptedClient {
            calls: AtomicUsize::new(0),
        });
        let servers = vec![
            ServerSettings {
                id: "coop-east".to_string(),
                name: "East Coop".to_string(),
                query_address: Some("127.0.0.1:27131".to_string()),
            },
            ServerSettings {
                id: "coop-west".to_string(),
                name: "West Coop".to_string(),
                query_address: None,
            },
        ];
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        let mut rosters = spawn_roster_pollers(
            &servers,
            client,
            Duration::from_secs(30),
            &shutdown_receiver,
        );

        assert_eq!(rosters.len(), 1);
        let east = rosters
            .get_mut("coop-east")
            .expect("Expected an east roster");
        east.changed().await.expect("Expected a roster update");
        assert_eq!(east.borrow_and_update()[0].name, "Alpha");

        shutdown_sender.send(true).expect("Expected pollers to listen");
    }
}
