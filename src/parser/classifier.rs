use chrono::{DateTime, Utc};

use super::timestamp::{parse_log_opened_timestamp, parse_log_timestamp, split_timestamp_prefix};

const GAMEPLAY_PREFIX: &str = "LogGameplayEvents: Display: ";
const MAP_TRAVEL_PREFIX: &str = "LogGameMode: ProcessServerTravel: ";
const MAP_LOAD_PREFIX: &str = "LogLoad: LoadMap: ";
const LOGIN_PREFIX: &str = "LogNet: Login request: ";
const CONNECTION_PREFIX: &str = "LogNet: NotifyAcceptedConnection: ";
const REGISTER_PREFIX: &str = "LogGameSession: RegisterPlayer: ";
const JOIN_PREFIX: &str = "LogNet: Join succeeded: ";
const CONNECTION_CLOSE_PREFIXES: [&str; 2] =
    ["LogNet: UNetConnection::Close: ", "LogNet: UChannel::Close: "];
const GAME_OVER_PREFIX: &str = "LogSession: Display: AINSGameSession::HandleMatchHasEnded";
const LOG_OPENED_PREFIX: &str = "Log file open, ";
const CHAT_PREFIX: &str = "LogChat: Display: ";
const CHAT_COMMAND_MARKER: char = '!';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    MapTravel,
    MapLoad,
    ObjectiveDestroyed,
    ObjectiveCaptured,
    Kill,
    Login,
    Connection,
    Register,
    JoinSucceeded,
    Disconnect,
    RoundStart,
    RoundEnd,
    GameOver,
    LogFileOpened,
    ChatCommand,
}

/// Raw captures of one recognised line, still borrowed from the line text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent<'a> {
    MapTravel {
        url: &'a str,
    },
    MapLoad {
        url: &'a str,
    },
    ObjectiveDestroyed {
        objective: &'a str,
        owner_team: &'a str,
        for_team: &'a str,
        players: &'a str,
    },
    ObjectiveCaptured {
        objective: &'a str,
        for_team: &'a str,
        from_team: &'a str,
        players: &'a str,
    },
    Kill {
        attackers: &'a str,
        victim: &'a str,
        weapon: &'a str,
    },
    Login {
        options: &'a str,
        user_id: &'a str,
    },
    Connection {
        remote_addr: &'a str,
    },
    Register {
        user_id: &'a str,
    },
    JoinSucceeded {
        name: &'a str,
    },
    Disconnect {
        unique_id: &'a str,
    },
    RoundStart {
        round: &'a str,
    },
    RoundEnd {
        round: &'a str,
        outcome: &'a str,
    },
    GameOver,
    LogFileOpened {
        opened_at: &'a str,
    },
    ChatCommand {
        speaker: &'a str,
        channel: &'a str,
        message: &'a str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine<'a> {
    pub kind: LineKind,
    pub at: DateTime<Utc>,
    pub event: RawEvent<'a>,
}

type Matcher = for<'a> fn(&'a str) -> Option<RawEvent<'a>>;

/// Grammars in precedence order. Objective grammars run before the kill
/// grammar because their player lists share the kill list syntax.
const GRAMMARS: [(LineKind, Matcher); 15] = [
    (LineKind::MapTravel, match_map_travel),
    (LineKind::MapLoad, match_map_load),
    (LineKind::ObjectiveDestroyed, match_objective_destroyed),
    (LineKind::ObjectiveCaptured, match_objective_captured),
    (LineKind::Kill, match_kill),
    (LineKind::Login, match_login),
    (LineKind::Connection, match_connection),
    (LineKind::Register, match_register),
    (LineKind::JoinSucceeded, match_join_succeeded),
    (LineKind::Disconnect, match_disconnect),
    (LineKind::RoundStart, match_round_start),
    (LineKind::RoundEnd, match_round_end),
    (LineKind::GameOver, match_game_over),
    (LineKind::LogFileOpened, match_log_file_opened),
    (LineKind::ChatCommand, match_chat_command),
];

/// Returns the first grammar that accepts `line`, with its timestamp.
///
/// Lines nothing accepts, and lines whose timestamp cannot be read, yield
/// `None`. Only the log-opened banner may omit the bracketed stamp since it
/// carries its own.
pub fn classify(line: &str) -> Option<ClassifiedLine<'_>> {
    let (stamp, body) = split_timestamp_prefix(line);
    if body.is_empty() {
        return None;
    }

    let (kind, event) = GRAMMARS
        .iter()
        .find_map(|(kind, matcher)| matcher(body).map(|event| (*kind, event)))?;

    let at = match (&event, stamp) {
        (RawEvent::LogFileOpened { opened_at }, stamp) => parse_log_opened_timestamp(opened_at)
            .or_else(|| stamp.and_then(parse_log_timestamp))?,
        (_, Some(stamp)) => parse_log_timestamp(stamp)?,
        (_, None) => return None,
    };

    Some(ClassifiedLine { kind, at, event })
}

/// Cheap pre-check used by the backward recovery scan.
pub(crate) fn is_map_transition(kind: LineKind) -> bool {
    matches!(kind, LineKind::MapTravel | LineKind::MapLoad)
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn match_map_travel(body: &str) -> Option<RawEvent<'_>> {
    let url = non_empty(body.strip_prefix(MAP_TRAVEL_PREFIX)?)?;
    Some(RawEvent::MapTravel { url })
}

fn match_map_load(body: &str) -> Option<RawEvent<'_>> {
    let url = non_empty(body.strip_prefix(MAP_LOAD_PREFIX)?)?;
    Some(RawEvent::MapLoad { url })
}

fn match_objective_destroyed(body: &str) -> Option<RawEvent<'_>> {
    let rest = body.strip_prefix(GAMEPLAY_PREFIX)?.strip_prefix("Objective ")?;
    let (objective, rest) = rest.split_once(" owned by team ")?;
    let (owner_team, rest) = rest.split_once(" was destroyed for team ")?;
    let (for_team, players) = rest.split_once(" by ")?;

    Some(RawEvent::ObjectiveDestroyed {
        objective: non_empty(objective)?,
        owner_team: owner_team.trim(),
        for_team: for_team.trim(),
        players: strip_sentence_end(players),
    })
}

fn match_objective_captured(body: &str) -> Option<RawEvent<'_>> {
    let rest = body.strip_prefix(GAMEPLAY_PREFIX)?.strip_prefix("Objective ")?;
    let (objective, rest) = rest.split_once(" was captured for team ")?;
    let (for_team, rest) = rest.split_once(" from team ")?;
    let (from_team, players) = rest.split_once(" by ")?;

    Some(RawEvent::ObjectiveCaptured {
        objective: non_empty(objective)?,
        for_team: for_team.trim(),
        from_team: from_team.trim(),
        players: strip_sentence_end(players),
    })
}

fn strip_sentence_end(value: &str) -> &str {
    let value = value.trim();
    value.strip_suffix('.').unwrap_or(value)
}

fn match_kill(body: &str) -> Option<RawEvent<'_>> {
    let message = body.strip_prefix(GAMEPLAY_PREFIX)?;
    let (participants, weapon) = message.rsplit_once(" with ")?;
    let (attackers, victim) = split_kill_participants(participants)?;

    let victim = victim.trim();
    if !victim.ends_with(']') {
        return None;
    }

    Some(RawEvent::Kill {
        attackers: attackers.trim(),
        victim,
        weapon: non_empty(weapon)?,
    })
}

fn split_kill_participants(participants: &str) -> Option<(&str, &str)> {
    const BRACKETED_SEPARATOR: &str = "] killed ";

    if let Some(index) = participants.find(BRACKETED_SEPARATOR) {
        let attackers = &participants[..=index];
        let victim = &participants[index + BRACKETED_SEPARATOR.len()..];
        return Some((attackers, victim));
    }

    participants
        .split_once(" killed ")
        .or_else(|| participants.strip_prefix("killed ").map(|victim| ("", victim)))
}

fn match_login(body: &str) -> Option<RawEvent<'_>> {
    let rest = body.strip_prefix(LOGIN_PREFIX)?;
    let (options, rest) = rest.split_once(" userId: ")?;
    let user_id = rest
        .split_once(" platform: ")
        .map(|(user_id, _)| user_id)
        .unwrap_or(rest);

    Some(RawEvent::Login {
        options: options.trim(),
        user_id: non_empty(user_id)?,
    })
}

fn match_connection(body: &str) -> Option<RawEvent<'_>> {
    let rest = body.strip_prefix(CONNECTION_PREFIX)?;
    let (_, after_address_key) = rest.split_once("RemoteAddr: ")?;
    let remote_addr = after_address_key.split(',').next()?;

    Some(RawEvent::Connection {
        remote_addr: non_empty(remote_addr)?,
    })
}

fn match_register(body: &str) -> Option<RawEvent<'_>> {
    let user_id = non_empty(body.strip_prefix(REGISTER_PREFIX)?)?;
    Some(RawEvent::Register { user_id })
}

fn match_join_succeeded(body: &str) -> Option<RawEvent<'_>> {
    let name = non_empty(body.strip_prefix(JOIN_PREFIX)?)?;
    Some(RawEvent::JoinSucceeded { name })
}

fn match_disconnect(body: &str) -> Option<RawEvent<'_>> {
    let rest = CONNECTION_CLOSE_PREFIXES
        .iter()
        .find_map(|prefix| body.strip_prefix(prefix))?;
    let (_, after_id_key) = rest.split_once("UniqueId: ")?;
    let unique_id = after_id_key.split(',').next()?;

    Some(RawEvent::Disconnect {
        unique_id: non_empty(unique_id)?,
    })
}

fn match_round_start(body: &str) -> Option<RawEvent<'_>> {
    let rest = body.strip_prefix(GAMEPLAY_PREFIX)?.strip_prefix("Round ")?;
    let round = rest.trim().strip_suffix(" started")?;
    Some(RawEvent::RoundStart {
        round: non_empty(round)?,
    })
}

fn match_round_end(body: &str) -> Option<RawEvent<'_>> {
    let rest = body.strip_prefix(GAMEPLAY_PREFIX)?.strip_prefix("Round ")?;
    let (round, outcome) = rest.split_once(" Over:")?;
    Some(RawEvent::RoundEnd {
        round: non_empty(round)?,
        outcome: outcome.trim(),
    })
}

fn match_game_over(body: &str) -> Option<RawEvent<'_>> {
    body.starts_with(GAME_OVER_PREFIX).then_some(RawEvent::GameOver)
}

fn match_log_file_opened(body: &str) -> Option<RawEvent<'_>> {
    let opened_at = non_empty(body.strip_prefix(LOG_OPENED_PREFIX)?)?;
    Some(RawEvent::LogFileOpened { opened_at })
}

fn match_chat_command(body: &str) -> Option<RawEvent<'_>> {
    let rest = body.strip_prefix(CHAT_PREFIX)?;
    let (speaker_and_channel, message) = rest.split_once(" Chat: ")?;
    let message = message.trim();
    if !message.starts_with(CHAT_COMMAND_MARKER) {
        return None;
    }

    let (speaker, channel) = speaker_and_channel.rsplit_once(' ')?;
    Some(RawEvent::ChatCommand {
        speaker: non_empty(speaker)?,
        channel: channel.trim(),
        message,
    })
}
