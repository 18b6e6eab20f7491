mod memory;

use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::model::{
    Match, MatchId, MatchPlayerStat, MatchWeaponStat, NewMatch, NewPlayer, Player, PlayerId,
    Server,
};

pub use memory::MemoryStore;

/// Equality and time-range predicates for match lookups.
#[derive(Debug, Clone, Default)]
pub struct MatchFilter {
    pub server_id: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub active_only: bool,
}

impl MatchFilter {
    pub fn for_server(server_id: &str) -> Self {
        Self {
            server_id: Some(server_id.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn accepts(&self, record: &Match) -> bool {
        if let Some(server_id) = self.server_id.as_deref() {
            if record.server_id != server_id {
                return false;
            }
        }
        if let Some(started_after) = self.started_after {
            if record.started_at < started_after {
                return false;
            }
        }
        if let Some(started_before) = self.started_before {
            if record.started_at > started_before {
                return false;
            }
        }
        !self.active_only || record.is_active()
    }
}

/// Durable record storage consumed by the aggregation pipeline.
///
/// Calls are synchronous and may fail; callers log and skip the affected
/// credit rather than aborting the batch.
pub trait StatStore: Send + Sync {
    fn upsert_server(&self, server: &Server) -> StoreResult<()>;
    fn find_server(&self, server_id: &str) -> StoreResult<Option<Server>>;

    fn find_player(&self, player_id: PlayerId) -> StoreResult<Option<Player>>;
    fn find_player_by_external_id(&self, external_id: &str) -> StoreResult<Option<Player>>;
    /// Most recently seen player with exactly this name.
    fn find_player_by_name(&self, name: &str) -> StoreResult<Option<Player>>;
    fn create_player(&self, new_player: NewPlayer) -> StoreResult<Player>;
    fn update_player(&self, player: &Player) -> StoreResult<()>;

    /// Fails with a conflict when the server already has an active match.
    fn create_match(&self, new_match: NewMatch) -> StoreResult<Match>;
    fn update_match(&self, record: &Match) -> StoreResult<()>;
    fn find_match(&self, match_id: MatchId) -> StoreResult<Option<Match>>;
    fn find_active_match(&self, server_id: &str) -> StoreResult<Option<Match>>;
    fn find_matches(&self, filter: &MatchFilter) -> StoreResult<Vec<Match>>;

    fn find_match_player_stat(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
    ) -> StoreResult<Option<MatchPlayerStat>>;
    fn create_match_player_stat(&self, stat: &MatchPlayerStat) -> StoreResult<()>;
    fn update_match_player_stat(&self, stat: &MatchPlayerStat) -> StoreResult<()>;
    fn find_match_player_stats(&self, match_id: MatchId) -> StoreResult<Vec<MatchPlayerStat>>;

    fn find_match_weapon_stat(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        weapon: &str,
    ) -> StoreResult<Option<MatchWeaponStat>>;
    fn create_match_weapon_stat(&self, stat: &MatchWeaponStat) -> StoreResult<()>;
    fn update_match_weapon_stat(&self, stat: &MatchWeaponStat) -> StoreResult<()>;
    fn find_match_weapon_stats(
        &self,
        match_id: MatchId,
        player_id: Option<PlayerId>,
    ) -> StoreResult<Vec<MatchWeaponStat>>;

    /// Makes every write so far durable. Called after each applied batch and
    /// before its offset is committed.
    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
