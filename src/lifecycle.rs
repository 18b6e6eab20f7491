use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::StoreResult;
use crate::events::MapContext;
use crate::model::{Match, MatchPlayerStat, NewMatch, Server, TeamId, UNKNOWN_MAP_NAME};
use crate::recovery::find_last_map_transition;
use crate::store::StatStore;

/// Disconnects this soon after a map travel are the travel itself.
pub const TRAVEL_RECONNECT_WINDOW_SECONDS: i64 = 30;

/// Tracks the single active match of one server.
#[derive(Debug)]
pub struct MatchLifecycle {
    server_id: String,
    log_path: PathBuf,
    active: Option<Match>,
    last_travel_at: Option<DateTime<Utc>>,
}

impl MatchLifecycle {
    /// Adopts the store's active match for `server`, if any, so a restarted
    /// worker keeps attributing to it.
    pub fn resume(store: &dyn StatStore, server: &Server) -> StoreResult<Self> {
        let active = store.find_active_match(&server.id)?;
        if let Some(record) = active.as_ref() {
            tracing::info!(
                server_id = %server.id,
                match_id = record.id,
                map = %record.map_label(),
                "Resuming active match"
            );
        }

        Ok(Self {
            server_id: server.id.clone(),
            log_path: server.log_path.clone(),
            active,
            last_travel_at: None,
        })
    }

    pub fn active_match(&self) -> Option<&Match> {
        self.active.as_ref()
    }

    pub fn last_travel_at(&self) -> Option<DateTime<Utc>> {
        self.last_travel_at
    }

    /// Closes whatever match is still open and opens one for `context`.
    ///
    /// A transition identical to the one that opened the active match (same
    /// start, map and scenario) is a replayed line and keeps that match.
    pub fn on_map_transition(
        &mut self,
        store: &dyn StatStore,
        context: &MapContext,
        at: DateTime<Utc>,
        via_travel: bool,
    ) -> StoreResult<&Match> {
        if via_travel {
            self.last_travel_at = Some(at);
        }

        let is_replay = self
            .active
            .as_ref()
            .is_some_and(|record| opened_by(record, context, at));
        if is_replay {
            tracing::debug!(
                server_id = %self.server_id,
                map = %context.map,
                started_at = %at,
                "Map transition already applied; keeping active match"
            );
            return self
                .active
                .as_ref()
                .ok_or_else(|| crate::error::StoreError::NotFound {
                    entity: "active match",
                    id: self.server_id.clone(),
                });
        }

        self.close_active_match(store)?;
        self.open_match(store, Some(context), at)
    }

    /// Returns the active match, recovering one from the log if needed.
    ///
    /// Recovery scans the log backward for the last map transition at or
    /// before `at`; without one a placeholder match starts at `at`.
    pub fn ensure_active_match(
        &mut self,
        store: &dyn StatStore,
        at: DateTime<Utc>,
    ) -> StoreResult<&Match> {
        if self.active.is_none() {
            if let Some(record) = store.find_active_match(&self.server_id)? {
                self.active = Some(record);
            }
        }

        if self.active.is_none() {
            let recovered = match find_last_map_transition(&self.log_path, at) {
                Ok(recovered) => recovered,
                Err(error) => {
                    tracing::warn!(
                        server_id = %self.server_id,
                        error = %error,
                        "Failed to scan log for map context"
                    );
                    None
                }
            };

            match recovered {
                Some(recovered) => {
                    tracing::info!(
                        server_id = %self.server_id,
                        map = %recovered.context.map,
                        recovered_at = %recovered.at,
                        via_travel = recovered.via_travel,
                        "Recovered map context for orphaned event"
                    );
                    if recovered.via_travel {
                        self.last_travel_at = Some(recovered.at);
                    }
                    self.open_match(store, Some(&recovered.context), recovered.at)?;
                }
                None => {
                    tracing::warn!(
                        server_id = %self.server_id,
                        event_at = %at,
                        "No map context found; opening placeholder match"
                    );
                    self.open_match(store, None, at)?;
                }
            }
        }

        self.active
            .as_ref()
            .ok_or_else(|| crate::error::StoreError::NotFound {
                entity: "active match",
                id: self.server_id.clone(),
            })
    }

    fn open_match(
        &mut self,
        store: &dyn StatStore,
        context: Option<&MapContext>,
        at: DateTime<Utc>,
    ) -> StoreResult<&Match> {
        let record = store.create_match(NewMatch {
            server_id: self.server_id.clone(),
            map: Some(
                context
                    .map(|context| context.map.clone())
                    .unwrap_or_else(|| UNKNOWN_MAP_NAME.to_string()),
            ),
            scenario: context.and_then(|context| context.scenario.clone()),
            started_at: at,
        })?;

        tracing::info!(
            server_id = %self.server_id,
            match_id = record.id,
            map = %record.map_label(),
            scenario = record.scenario.as_deref().unwrap_or("unknown"),
            player_team = record.player_team.map(|team| team.label()).unwrap_or("unknown"),
            "Opened match"
        );

        Ok(self.active.insert(record))
    }

    /// Ends the active match at its latest known activity and disconnects
    /// every player row still marked connected at that same moment.
    pub fn close_active_match(&mut self, store: &dyn StatStore) -> StoreResult<Option<Match>> {
        let Some(mut record) = self.active.take() else {
            return Ok(None);
        };

        match close_match(store, &mut record) {
            Ok(()) => {
                tracing::info!(
                    server_id = %self.server_id,
                    match_id = record.id,
                    ended_at = ?record.ended_at,
                    winner_team = ?record.winner_team,
                    "Closed match"
                );
                Ok(Some(record))
            }
            Err(error) => {
                self.active = Some(record);
                Err(error)
            }
        }
    }

    pub fn on_round_start(&mut self, store: &dyn StatStore, round: u32, at: DateTime<Utc>) {
        self.update_active(store, at, |record| record.current_round = Some(round));
    }

    pub fn on_round_end(
        &mut self,
        store: &dyn StatStore,
        round: u32,
        winner_team: Option<TeamId>,
        at: DateTime<Utc>,
    ) {
        self.update_active(store, at, |record| {
            record.current_round = Some(round);
            if winner_team.is_some() {
                record.winner_team = winner_team;
            }
        });
    }

    /// Stamps the game-over time. The match stays open until the next map
    /// transition so trailing lines still attach to it.
    pub fn on_game_over(&mut self, store: &dyn StatStore, at: DateTime<Utc>) {
        self.update_active(store, at, |record| record.game_over_at = Some(at));
    }

    pub fn record_activity(&mut self, store: &dyn StatStore, at: DateTime<Utc>) {
        if self.active.as_ref().is_some_and(|record| record.updated_at >= at) {
            return;
        }
        self.update_active(store, at, |_| {});
    }

    /// A fresh log file means the server process restarted.
    pub fn on_log_reopened(&mut self) {
        self.last_travel_at = None;
    }

    pub fn is_travel_reconnect(&self, at: DateTime<Utc>) -> bool {
        let Some(last_travel_at) = self.last_travel_at else {
            return false;
        };

        at >= last_travel_at && at - last_travel_at <= TimeDelta::seconds(TRAVEL_RECONNECT_WINDOW_SECONDS)
    }

    fn update_active(
        &mut self,
        store: &dyn StatStore,
        at: DateTime<Utc>,
        apply: impl FnOnce(&mut Match),
    ) {
        let Some(record) = self.active.as_mut() else {
            tracing::debug!(server_id = %self.server_id, "No active match to update");
            return;
        };

        let mut updated = record.clone();
        apply(&mut updated);
        updated.touch(at);

        match store.update_match(&updated) {
            Ok(()) => *record = updated,
            Err(error) => tracing::warn!(
                server_id = %self.server_id,
                match_id = record.id,
                error = %error,
                "Failed to update match"
            ),
        }
    }
}

fn opened_by(record: &Match, context: &MapContext, at: DateTime<Utc>) -> bool {
    record.started_at == at
        && record.map.as_deref() == Some(context.map.as_str())
        && record.scenario == context.scenario
}

fn close_match(store: &dyn StatStore, record: &mut Match) -> StoreResult<()> {
    let player_stats = store.find_match_player_stats(record.id)?;

    let ended_at = player_stats
        .iter()
        .map(MatchPlayerStat::last_activity)
        .fold(record.updated_at.max(record.started_at), std::cmp::max);

    for mut stat in player_stats.into_iter().filter(|stat| stat.is_connected) {
        stat.disconnect(ended_at);
        if let Err(error) = store.update_match_player_stat(&stat) {
            tracing::warn!(
                match_id = record.id,
                player_id = stat.player_id,
                error = %error,
                "Failed to disconnect player from closed match"
            );
        }
    }

    record.ended_at = Some(ended_at);
    store.update_match(record)
}
