use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError, StoreResult};
use crate::model::{
    Match, MatchId, MatchPlayerStat, MatchWeaponStat, NewMatch, NewPlayer, Player, PlayerId,
    Server,
};
use crate::sidecar::{read_json, write_json_atomically};

use super::{MatchFilter, StatStore};

#[derive(Debug, Default)]
struct MemoryTables {
    servers: BTreeMap<String, Server>,
    players: BTreeMap<PlayerId, Player>,
    matches: BTreeMap<MatchId, Match>,
    player_stats: BTreeMap<(MatchId, PlayerId), MatchPlayerStat>,
    weapon_stats: BTreeMap<(MatchId, PlayerId, String), MatchWeaponStat>,
    next_player_id: PlayerId,
    next_match_id: MatchId,
    /// Written since the last flush.
    dirty: bool,
    #[cfg(test)]
    rejected_player_names: Vec<String>,
}

/// On-disk form of the tables.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreSnapshot {
    servers: Vec<Server>,
    players: Vec<Player>,
    matches: Vec<Match>,
    player_stats: Vec<MatchPlayerStat>,
    weapon_stats: Vec<MatchWeaponStat>,
    next_player_id: PlayerId,
    next_match_id: MatchId,
}

impl MemoryTables {
    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let next_player_id = snapshot
            .players
            .iter()
            .map(|player| player.id)
            .fold(snapshot.next_player_id, std::cmp::max);
        let next_match_id = snapshot
            .matches
            .iter()
            .map(|record| record.id)
            .fold(snapshot.next_match_id, std::cmp::max);

        Self {
            servers: snapshot
                .servers
                .into_iter()
                .map(|server| (server.id.clone(), server))
                .collect(),
            players: snapshot
                .players
                .into_iter()
                .map(|player| (player.id, player))
                .collect(),
            matches: snapshot
                .matches
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
            player_stats: snapshot
                .player_stats
                .into_iter()
                .map(|stat| ((stat.match_id, stat.player_id), stat))
                .collect(),
            weapon_stats: snapshot
                .weapon_stats
                .into_iter()
                .map(|stat| ((stat.match_id, stat.player_id, stat.weapon.clone()), stat))
                .collect(),
            next_player_id,
            next_match_id,
            ..Self::default()
        }
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            servers: self.servers.values().cloned().collect(),
            players: self.players.values().cloned().collect(),
            matches: self.matches.values().cloned().collect(),
            player_stats: self.player_stats.values().cloned().collect(),
            weapon_stats: self.weapon_stats.values().cloned().collect(),
            next_player_id: self.next_player_id,
            next_match_id: self.next_match_id,
        }
    }
}

/// Thread-safe in-process store. Shared by every server worker.
///
/// A store opened with [`MemoryStore::open`] writes a JSON snapshot of every
/// table on [`StatStore::flush`] and reloads it on the next start.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by the snapshot at `snapshot_path`; a missing
    /// snapshot is an empty store.
    pub fn open(snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let tables = match read_json::<StoreSnapshot>(&snapshot_path)? {
            Some(snapshot) => {
                tracing::info!(
                    path = %snapshot_path.display(),
                    match_count = snapshot.matches.len(),
                    player_count = snapshot.players.len(),
                    "Loaded stats snapshot"
                );
                MemoryTables::from_snapshot(snapshot)
            }
            None => MemoryTables::default(),
        };

        Ok(Self {
            tables: Mutex::new(tables),
            snapshot_path: Some(snapshot_path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, MemoryTables>> {
        self.tables
            .lock()
            .map_err(|error| StoreError::Unavailable(error.to_string()))
    }

    fn tables_mut(&self) -> StoreResult<MutexGuard<'_, MemoryTables>> {
        let mut tables = self.tables()?;
        tables.dirty = true;
        Ok(tables)
    }

    /// Makes every create/update of a player with this name fail.
    #[cfg(test)]
    pub(crate) fn reject_player_name(&self, name: &str) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.rejected_player_names.push(name.to_string());
        }
    }
}

#[cfg(test)]
fn check_player_name(tables: &MemoryTables, name: Option<&str>) -> StoreResult<()> {
    match name {
        Some(name) if tables.rejected_player_names.iter().any(|value| value == name) => Err(
            StoreError::Unavailable(format!("player writes rejected for {name}")),
        ),
        _ => Ok(()),
    }
}

#[cfg(not(test))]
fn check_player_name(_tables: &MemoryTables, _name: Option<&str>) -> StoreResult<()> {
    Ok(())
}

impl StatStore for MemoryStore {
    fn upsert_server(&self, server: &Server) -> StoreResult<()> {
        let mut tables = self.tables_mut()?;
        tables.servers.insert(server.id.clone(), server.clone());
        Ok(())
    }

    fn find_server(&self, server_id: &str) -> StoreResult<Option<Server>> {
        Ok(self.tables()?.servers.get(server_id).cloned())
    }

    fn find_player(&self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        Ok(self.tables()?.players.get(&player_id).cloned())
    }

    fn find_player_by_external_id(&self, external_id: &str) -> StoreResult<Option<Player>> {
        Ok(self
            .tables()?
            .players
            .values()
            .find(|player| player.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    fn find_player_by_name(&self, name: &str) -> StoreResult<Option<Player>> {
        Ok(self
            .tables()?
            .players
            .values()
            .filter(|player| player.name.as_deref() == Some(name))
            .max_by_key(|player| (player.last_seen_at, player.id))
            .cloned())
    }

    fn create_player(&self, new_player: NewPlayer) -> StoreResult<Player> {
        let mut tables = self.tables_mut()?;
        check_player_name(&tables, new_player.name.as_deref())?;

        if let Some(external_id) = new_player.external_id.as_deref() {
            let duplicate = tables
                .players
                .values()
                .any(|player| player.external_id.as_deref() == Some(external_id));
            if duplicate {
                return Err(StoreError::Conflict {
                    entity: "player",
                    key: external_id.to_string(),
                });
            }
        }

        tables.next_player_id += 1;
        let player = Player {
            id: tables.next_player_id,
            external_id: new_player.external_id,
            name: new_player.name,
            last_address: None,
            first_seen_at: new_player.seen_at,
            last_seen_at: new_player.seen_at,
        };
        tables.players.insert(player.id, player.clone());
        Ok(player)
    }

    fn update_player(&self, player: &Player) -> StoreResult<()> {
        let mut tables = self.tables_mut()?;
        check_player_name(&tables, player.name.as_deref())?;

        let Some(slot) = tables.players.get_mut(&player.id) else {
            return Err(StoreError::NotFound {
                entity: "player",
                id: player.id.to_string(),
            });
        };
        *slot = player.clone();
        Ok(())
    }

    fn create_match(&self, new_match: NewMatch) -> StoreResult<Match> {
        let mut tables = self.tables_mut()?;
        let has_active_match = tables
            .matches
            .values()
            .any(|record| record.server_id == new_match.server_id && record.is_active());
        if has_active_match {
            return Err(StoreError::Conflict {
                entity: "active match",
                key: new_match.server_id,
            });
        }

        tables.next_match_id += 1;
        let player_team = new_match.player_team();
        let record = Match {
            id: tables.next_match_id,
            server_id: new_match.server_id,
            map: new_match.map,
            scenario: new_match.scenario,
            player_team,
            started_at: new_match.started_at,
            ended_at: None,
            winner_team: None,
            current_round: None,
            game_over_at: None,
            updated_at: new_match.started_at,
        };
        tables.matches.insert(record.id, record.clone());
        Ok(record)
    }

    fn update_match(&self, record: &Match) -> StoreResult<()> {
        let mut tables = self.tables_mut()?;
        let Some(slot) = tables.matches.get_mut(&record.id) else {
            return Err(StoreError::NotFound {
                entity: "match",
                id: record.id.to_string(),
            });
        };
        *slot = record.clone();
        Ok(())
    }

    fn find_match(&self, match_id: MatchId) -> StoreResult<Option<Match>> {
        Ok(self.tables()?.matches.get(&match_id).cloned())
    }

    fn find_active_match(&self, server_id: &str) -> StoreResult<Option<Match>> {
        Ok(self
            .tables()?
            .matches
            .values()
            .find(|record| record.server_id == server_id && record.is_active())
            .cloned())
    }

    fn find_matches(&self, filter: &MatchFilter) -> StoreResult<Vec<Match>> {
        Ok(self
            .tables()?
            .matches
            .values()
            .filter(|record| filter.accepts(record))
            .cloned()
            .collect())
    }

    fn find_match_player_stat(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
    ) -> StoreResult<Option<MatchPlayerStat>> {
        Ok(self
            .tables()?
            .player_stats
            .get(&(match_id, player_id))
            .cloned())
    }

    fn create_match_player_stat(&self, stat: &MatchPlayerStat) -> StoreResult<()> {
        let mut tables = self.tables_mut()?;
        let key = (stat.match_id, stat.player_id);
        if tables.player_stats.contains_key(&key) {
            return Err(StoreError::Conflict {
                entity: "match player stat",
                key: format!("{}:{}", stat.match_id, stat.player_id),
            });
        }
        tables.player_stats.insert(key, stat.clone());
        Ok(())
    }

    fn update_match_player_stat(&self, stat: &MatchPlayerStat) -> StoreResult<()> {
        let mut tables = self.tables_mut()?;
        let Some(slot) = tables.player_stats.get_mut(&(stat.match_id, stat.player_id)) else {
            return Err(StoreError::NotFound {
                entity: "match player stat",
                id: format!("{}:{}", stat.match_id, stat.player_id),
            });
        };
        *slot = stat.clone();
        Ok(())
    }

    fn find_match_player_stats(&self, match_id: MatchId) -> StoreResult<Vec<MatchPlayerStat>> {
        Ok(self
            .tables()?
            .player_stats
            .range((match_id, PlayerId::MIN)..=(match_id, PlayerId::MAX))
            .map(|(_, stat)| stat.clone())
            .collect())
    }

    fn find_match_weapon_stat(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        weapon: &str,
    ) -> StoreResult<Option<MatchWeaponStat>> {
        Ok(self
            .tables()?
            .weapon_stats
            .get(&(match_id, player_id, weapon.to_string()))
            .cloned())
    }

    fn create_match_weapon_stat(&self, stat: &MatchWeaponStat) -> StoreResult<()> {
        let mut tables = self.tables_mut()?;
        let key = (stat.match_id, stat.player_id, stat.weapon.clone());
        if tables.weapon_stats.contains_key(&key) {
            return Err(StoreError::Conflict {
                entity: "match weapon stat",
                key: format!("{}:{}:{}", stat.match_id, stat.player_id, stat.weapon),
            });
        }
        tables.weapon_stats.insert(key, stat.clone());
        Ok(())
    }

    fn update_match_weapon_stat(&self, stat: &MatchWeaponStat) -> StoreResult<()> {
        let mut tables = self.tables_mut()?;
        let key = (stat.match_id, stat.player_id, stat.weapon.clone());
        let Some(slot) = tables.weapon_stats.get_mut(&key) else {
            return Err(StoreError::NotFound {
                entity: "match weapon stat",
                id: format!("{}:{}:{}", stat.match_id, stat.player_id, stat.weapon),
            });
        };
        *slot = stat.clone();
        Ok(())
    }

    fn find_match_weapon_stats(
        &self,
        match_id: MatchId,
        player_id: Option<PlayerId>,
    ) -> StoreResult<Vec<MatchWeaponStat>> {
        Ok(self
            .tables()?
            .weapon_stats
            .values()
            .filter(|stat| stat.match_id == match_id)
            .filter(|stat| player_id.map_or(true, |player_id| stat.player_id == player_id))
            .cloned()
            .collect())
    }

    fn flush(&self) -> StoreResult<()> {
        let Some(snapshot_path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };

        let mut tables = self.tables()?;
        if !tables.dirty {
            return Ok(());
        }
        write_json_atomically(snapshot_path, &tables.snapshot(), "stats snapshot")
            .map_err(|error| StoreError::Persist(error.to_string()))?;
        tables.dirty = false;
        Ok(())
    }
}
