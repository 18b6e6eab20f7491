use chrono::{DateTime, Utc};

use crate::model::TeamId;

/// External id the server prints for AI-controlled characters.
pub const BOT_EXTERNAL_ID: &str = "INVALID";

/// One entry of an attacker or credited-player list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub external_id: String,
    pub team: Option<TeamId>,
}

impl Actor {
    pub fn is_bot(&self) -> bool {
        self.external_id == BOT_EXTERNAL_ID
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapContext {
    pub map: String,
    pub scenario: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    PlayerKill {
        attackers: Vec<Actor>,
        victim: Actor,
        weapon: String,
    },
    PlayerLogin {
        name: String,
        external_id: String,
    },
    PlayerConnection {
        address: String,
    },
    PlayerRegister {
        external_id: String,
    },
    PlayerJoin {
        name: String,
    },
    PlayerLeave {
        external_id: String,
    },
    MapLoad(MapContext),
    MapTravel(MapContext),
    RoundStart {
        round: u32,
    },
    RoundEnd {
        round: u32,
        winner_team: Option<TeamId>,
        reason: Option<String>,
    },
    GameOver,
    ObjectiveCaptured {
        objective: String,
        team: TeamId,
        credited: Vec<Actor>,
    },
    ObjectiveDestroyed {
        objective: String,
        team: TeamId,
        credited: Vec<Actor>,
    },
    LogFileOpened,
    ChatCommand {
        name: String,
        external_id: String,
        channel: String,
        command: String,
        args: Vec<String>,
    },
}

impl EventPayload {
    pub fn kind_label(&self) -> &'static str {
        match self {
            EventPayload::PlayerKill { .. } => "player_kill",
            EventPayload::PlayerLogin { .. } => "player_login",
            EventPayload::PlayerConnection { .. } => "player_connection",
            EventPayload::PlayerRegister { .. } => "player_register",
            EventPayload::PlayerJoin { .. } => "player_join",
            EventPayload::PlayerLeave { .. } => "player_leave",
            EventPayload::MapLoad(_) => "map_load",
            EventPayload::MapTravel(_) => "map_travel",
            EventPayload::RoundStart { .. } => "round_start",
            EventPayload::RoundEnd { .. } => "round_end",
            EventPayload::GameOver => "game_over",
            EventPayload::ObjectiveCaptured { .. } => "objective_captured",
            EventPayload::ObjectiveDestroyed { .. } => "objective_destroyed",
            EventPayload::LogFileOpened => "log_file_opened",
            EventPayload::ChatCommand { .. } => "chat_command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub at: DateTime<Utc>,
    pub server_id: String,
    pub payload: EventPayload,
}
