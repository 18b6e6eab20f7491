use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MatchId = u64;
pub type PlayerId = u64;
pub type TeamId = u8;

pub(crate) const UNKNOWN_MAP_NAME: &str = "Unknown";
pub(crate) const SECURITY_SCENARIO_SUFFIX: &str = "_Security";
pub(crate) const INSURGENTS_SCENARIO_SUFFIX: &str = "_Insurgents";

/// The side human players are on for a cooperative scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TeamSide {
    Security,
    Insurgents,
}

impl TeamSide {
    pub fn from_scenario(scenario: &str) -> Option<Self> {
        if scenario.ends_with(SECURITY_SCENARIO_SUFFIX) {
            return Some(TeamSide::Security);
        }
        if scenario.ends_with(INSURGENTS_SCENARIO_SUFFIX) {
            return Some(TeamSide::Insurgents);
        }
        None
    }

    pub fn label(self) -> &'static str {
        match self {
            TeamSide::Security => "Security",
            TeamSide::Insurgents => "Insurgents",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: String,
    pub name: String,
    pub log_path: PathBuf,
}

impl Server {
    /// Builds a server record for a log file, using the file stem as id.
    pub fn from_log_path(log_path: PathBuf, display_name: Option<&str>) -> Option<Self> {
        let id = server_id_for_log_path(&log_path)?;
        let name = display_name
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());

        Some(Self { id, name, log_path })
    }
}

pub fn server_id_for_log_path(log_path: &std::path::Path) -> Option<String> {
    log_path
        .file_stem()
        .and_then(|value| value.to_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub server_id: String,
    pub map: Option<String>,
    pub scenario: Option<String>,
    pub player_team: Option<TeamSide>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub winner_team: Option<TeamId>,
    pub current_round: Option<u32>,
    pub game_over_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn map_label(&self) -> &str {
        self.map.as_deref().unwrap_or(UNKNOWN_MAP_NAME)
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMatch {
    pub server_id: String,
    pub map: Option<String>,
    pub scenario: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl NewMatch {
    pub fn player_team(&self) -> Option<TeamSide> {
        self.scenario.as_deref().and_then(TeamSide::from_scenario)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub last_address: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Player {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.external_id.as_deref())
            .unwrap_or("unknown player")
    }
}

#[derive(Debug, Clone)]
pub struct NewPlayer {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPlayerStat {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub team: Option<TeamId>,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub friendly_fire_kills: u32,
    pub suicides: u32,
    pub objectives_captured: u32,
    pub objectives_destroyed: u32,
    pub session_count: u32,
    pub is_connected: bool,
    pub first_joined_at: DateTime<Utc>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub last_left_at: Option<DateTime<Utc>>,
    pub connected_seconds: i64,
    pub updated_at: DateTime<Utc>,
}

impl MatchPlayerStat {
    pub fn new(
        match_id: MatchId,
        player_id: PlayerId,
        team: Option<TeamId>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            player_id,
            team,
            kills: 0,
            deaths: 0,
            assists: 0,
            friendly_fire_kills: 0,
            suicides: 0,
            objectives_captured: 0,
            objectives_destroyed: 0,
            session_count: 1,
            is_connected: true,
            first_joined_at: joined_at,
            session_started_at: Some(joined_at),
            last_left_at: None,
            connected_seconds: 0,
            updated_at: joined_at,
        }
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }

    /// Ends the current session at `left_at`, folding its length into the
    /// cumulative connected time.
    pub(crate) fn disconnect(&mut self, left_at: DateTime<Utc>) {
        if let Some(session_started_at) = self.session_started_at.take() {
            let session_seconds = (left_at - session_started_at).num_seconds().max(0);
            self.connected_seconds = self.connected_seconds.saturating_add(session_seconds);
        }
        self.is_connected = false;
        self.last_left_at = Some(left_at);
        self.touch(left_at);
    }

    /// Latest moment this row proves the match was still being played.
    pub(crate) fn last_activity(&self) -> DateTime<Utc> {
        match self.last_left_at {
            Some(last_left_at) if last_left_at > self.updated_at => last_left_at,
            _ => self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchWeaponStat {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub weapon: String,
    pub kills: u32,
    pub assists: u32,
}

impl MatchWeaponStat {
    pub fn new(match_id: MatchId, player_id: PlayerId, weapon: &str) -> Self {
        Self {
            match_id,
            player_id,
            weapon: weapon.to_string(),
            kills: 0,
            assists: 0,
        }
    }
}
