use std::cmp::Reverse;

use crate::error::StoreResult;
use crate::model::{Match, Player};
use crate::store::StatStore;

const TOP_PLAYER_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommandKind {
    Stats,
    Top,
}

impl ChatCommandKind {
    pub fn parse(command: &str) -> Option<Self> {
        match command {
            "stats" => Some(Self::Stats),
            "top" => Some(Self::Top),
            _ => None,
        }
    }
}

/// Builds the reply for a chat command issued by `caller` in `record`.
pub fn reply(
    store: &dyn StatStore,
    kind: ChatCommandKind,
    record: &Match,
    caller: &Player,
) -> StoreResult<String> {
    match kind {
        ChatCommandKind::Stats => stats_reply(store, record, caller),
        ChatCommandKind::Top => top_reply(store, record),
    }
}

pub fn stats_reply(store: &dyn StatStore, record: &Match, caller: &Player) -> StoreResult<String> {
    let Some(stat) = store.find_match_player_stat(record.id, caller.id)? else {
        return Ok(format!(
            "{}: no stats yet on {}",
            caller.display_name(),
            record.map_label()
        ));
    };

    Ok(format!(
        "{}: {} kills, {} deaths, {} assists on {}",
        caller.display_name(),
        stat.kills,
        stat.deaths,
        stat.assists,
        record.map_label()
    ))
}

/// Top players of the match by kills, fewer deaths breaking ties.
pub fn top_reply(store: &dyn StatStore, record: &Match) -> StoreResult<String> {
    let mut stats = store.find_match_player_stats(record.id)?;
    stats.retain(|stat| stat.kills > 0);
    stats.sort_by_key(|stat| (Reverse(stat.kills), stat.deaths, stat.player_id));

    if stats.is_empty() {
        return Ok(format!("No kills yet on {}", record.map_label()));
    }

    let mut entries = Vec::with_capacity(TOP_PLAYER_COUNT);
    for (rank, stat) in stats.iter().take(TOP_PLAYER_COUNT).enumerate() {
        let name = store
            .find_player(stat.player_id)?
            .map(|player| player.display_name().to_string())
            .unwrap_or_else(|| format!("player {}", stat.player_id));
        entries.push(format!("{}. {} ({})", rank + 1, name, stat.kills));
    }

    Ok(format!("Top on {}: {}", record.map_label(), entries.join(", ")))
}

pub fn join_greeting(player: &Player, rejoined: bool) -> String {
    if rejoined {
        format!("Welcome back, {}", player.display_name())
    } else {
        format!("Welcome, {}", player.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::{stats_reply, top_reply, ChatCommandKind};
    use crate::model::{Match, MatchPlayerStat, NewMatch, NewPlayer, Player};
    use crate::store::{MemoryStore, StatStore};
    use chrono::{TimeZone, Utc};

    fn open_match(store: &MemoryStore) -> Match {
        store
            .create_match(NewMatch {
                server_id: "coop-east".to_string(),
                map: Some("Town".to_string()),
                scenario: None,
                started_at: Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap(),
            })
            .expect("Expected match")
    }

    fn add_player(store: &MemoryStore, record: &Match, name: &str, kills: u32, deaths: u32) -> Player {
        let player = store
            .create_player(NewPlayer {
                external_id: Some(format!("id-{name}")),
                name: Some(name.to_string()),
                seen_at: record.started_at,
            })
            .expect("Expected player");
        let mut stat = MatchPlayerStat::new(record.id, player.id, Some(0), record.started_at);
        stat.kills = kills;
        stat.deaths = deaths;
        store.create_match_player_stat(&stat).expect("Expected stat row");
        player
    }

    #[test]
    fn parses_known_commands_only() {
        assert_eq!(ChatCommandKind::parse("stats"), Some(ChatCommandKind::Stats));
        assert_eq!(ChatCommandKind::parse("top"), Some(ChatCommandKind::Top));
        assert_eq!(ChatCommandKind::parse("kick"), None);
    }

    #[test]
    fn stats_reply_reports_caller_counters() {
        let store = MemoryStore::new();
        let record = open_match(&store);
        let alpha = add_player(&store, &record, "Alpha", 7, 2);

        let reply = stats_reply(&store, &record, &alpha).expect("Expected reply");
        assert_eq!(reply, "Alpha: 7 kills, 2 deaths, 0 assists on Town");
    }

    #[test]
    fn top_reply_ranks_by_kills_then_deaths() {
        let store = MemoryStore::new();
        let record = open_match(&store);
        add_player(&store, &record, "Alpha", 4, 3);
        add_player(&store, &record, "Bravo", 9, 1);
        add_player(&store, &record, "Charlie", 4, 1);
        add_player(&store, &record, "Delta", 1, 0);

        let reply = top_reply(&store, &record).expect("Expected reply");
        assert_eq!(reply, "Top on Town: 1. Bravo (9), 2. Charlie (4), 3. Alpha (4)");
    }

    #[test]
    fn top_reply_without_kills() {
        let store = MemoryStore::new();
        let record = open_match(&store);
        add_player(&store, &record, "Alpha", 0, 2);

        let reply = top_reply(&store, &record).expect("Expected reply");
        assert_eq!(reply, "No kills yet on Town");
    }
}
