use crate::events::{Actor, DomainEvent, EventPayload, MapContext};
use crate::model::TeamId;

use super::classifier::{ClassifiedLine, RawEvent};
use super::weapon::normalize_weapon_name;

const KILL_LIST_DELIMITER: &str = " + ";
const OBJECTIVE_LIST_DELIMITER: &str = ", ";
const NO_ATTACKER_SENTINEL: &str = "?";
const SCENARIO_OPTION: &str = "Scenario=";
const NAME_OPTION: &str = "Name=";

/// Converts raw captures into a typed event owned by `server_id`.
///
/// Returns `None` when a required field is unusable (e.g. a victim entry
/// without an id), which callers treat like an unrecognised line.
pub fn normalize(line: &ClassifiedLine<'_>, server_id: &str) -> Option<DomainEvent> {
    let payload = match &line.event {
        RawEvent::MapTravel { url } => EventPayload::MapTravel(parse_map_url(url)?),
        RawEvent::MapLoad { url } => EventPayload::MapLoad(parse_map_url(url)?),
        RawEvent::ObjectiveDestroyed {
            objective,
            for_team,
            players,
            ..
        } => {
            let team = parse_team(for_team)?;
            EventPayload::ObjectiveDestroyed {
                objective: objective.to_string(),
                team,
                credited: parse_actor_list(players, Some(team)),
            }
        }
        RawEvent::ObjectiveCaptured {
            objective,
            for_team,
            players,
            ..
        } => {
            let team = parse_team(for_team)?;
            EventPayload::ObjectiveCaptured {
                objective: objective.to_string(),
                team,
                credited: parse_actor_list(players, Some(team)),
            }
        }
        RawEvent::Kill {
            attackers,
            victim,
            weapon,
        } => EventPayload::PlayerKill {
            attackers: parse_actor_list(attackers, None),
            victim: parse_actor_entry(victim, None)?,
            weapon: normalize_weapon_name(weapon),
        },
        RawEvent::Login { options, user_id } => EventPayload::PlayerLogin {
            name: url_option(options, NAME_OPTION)?.to_string(),
            external_id: strip_platform(user_id)?.to_string(),
        },
        RawEvent::Connection { remote_addr } => EventPayload::PlayerConnection {
            address: strip_port(remote_addr).to_string(),
        },
        RawEvent::Register { user_id } => EventPayload::PlayerRegister {
            external_id: strip_platform(user_id)?.to_string(),
        },
        RawEvent::JoinSucceeded { name } => EventPayload::PlayerJoin {
            name: name.to_string(),
        },
        RawEvent::Disconnect { unique_id } => EventPayload::PlayerLeave {
            external_id: strip_platform(unique_id)?.to_string(),
        },
        RawEvent::RoundStart { round } => EventPayload::RoundStart {
            round: round.trim().parse().ok()?,
        },
        RawEvent::RoundEnd { round, outcome } => {
            let (winner_team, reason) = parse_round_outcome(outcome);
            EventPayload::RoundEnd {
                round: round.trim().parse().ok()?,
                winner_team,
                reason,
            }
        }
        RawEvent::GameOver => EventPayload::GameOver,
        RawEvent::LogFileOpened { .. } => EventPayload::LogFileOpened,
        RawEvent::ChatCommand {
            speaker,
            channel,
            message,
        } => parse_chat_command(speaker, channel, message)?,
    };

    Some(DomainEvent {
        at: line.at,
        server_id: server_id.to_string(),
        payload,
    })
}

/// Parses an attacker or credited-player list into source order.
///
/// Index 0 is the primary actor. Kill lists join `Name[Id, team T]` entries
/// with `" + "`; objective lists join `Name[Id]` entries with `", "` and
/// take `default_team` from the surrounding event.
pub fn parse_actor_list(field: &str, default_team: Option<TeamId>) -> Vec<Actor> {
    let field = field.trim();
    if field.is_empty() || field == NO_ATTACKER_SENTINEL {
        return Vec::new();
    }

    let entries: Vec<&str> = if field.contains(KILL_LIST_DELIMITER) {
        field.split(KILL_LIST_DELIMITER).collect()
    } else if field.contains("team ") {
        vec![field]
    } else {
        field.split(OBJECTIVE_LIST_DELIMITER).collect()
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let actor = parse_actor_entry(entry, default_team);
            if actor.is_none() {
                tracing::debug!(entry = %entry, "Skipping unreadable actor entry");
            }
            actor
        })
        .collect()
}

/// Parses `Name[Id, team T]` or `Name[Id]`. Names may contain brackets
/// (clan tags), so the id bracket is the last one.
pub fn parse_actor_entry(entry: &str, default_team: Option<TeamId>) -> Option<Actor> {
    let entry = entry.trim();
    let inner = entry.strip_suffix(']')?;
    let open_index = inner.rfind('[')?;
    let name = inner[..open_index].trim();
    let fields = &inner[open_index + 1..];

    let (external_id, team) = match fields.split_once(',') {
        Some((external_id, team_field)) => {
            let team = team_field.trim().strip_prefix("team")?;
            (external_id.trim(), Some(parse_team(team)?))
        }
        None => (fields.trim(), default_team),
    };

    if external_id.is_empty() {
        return None;
    }

    Some(Actor {
        name: name.to_string(),
        external_id: external_id.to_string(),
        team,
    })
}

fn parse_team(value: &str) -> Option<TeamId> {
    value.trim().parse::<TeamId>().ok()
}

/// Reads `<path>?Opt=A?Scenario=B` into the map name and scenario.
pub fn parse_map_url(url: &str) -> Option<MapContext> {
    let mut parts = url.trim().split('?');
    let path = parts.next()?.trim();
    let map = path.rsplit('/').next()?.trim();
    if map.is_empty() {
        return None;
    }

    let scenario = parts
        .filter_map(|option| option.trim().strip_prefix(SCENARIO_OPTION))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string);

    Some(MapContext {
        map: map.to_string(),
        scenario,
    })
}

fn url_option<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    options
        .split('?')
        .filter_map(|option| option.trim().strip_prefix(key))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// `SteamNWI:7656...` → `7656...`; ids without a platform pass through.
fn strip_platform(user_id: &str) -> Option<&str> {
    let external_id = user_id
        .trim()
        .rsplit_once(':')
        .map(|(_, external_id)| external_id)
        .unwrap_or(user_id)
        .trim();

    (!external_id.is_empty()).then_some(external_id)
}

fn strip_port(remote_addr: &str) -> &str {
    let remote_addr = remote_addr.trim();
    match remote_addr.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|byte| byte.is_ascii_digit()) => host,
        _ => remote_addr,
    }
}

fn parse_round_outcome(outcome: &str) -> (Option<TeamId>, Option<String>) {
    let winner_team = outcome
        .strip_prefix("Team ")
        .and_then(|rest| rest.split_once(" won"))
        .and_then(|(team, _)| parse_team(team));

    let reason = outcome
        .split_once("(win reason: ")
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(reason, _)| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());

    (winner_team, reason)
}

fn parse_chat_command(speaker: &str, channel: &str, message: &str) -> Option<EventPayload> {
    let identity = speaker.strip_suffix(')')?;
    let (name, external_id) = identity.rsplit_once('(')?;

    let mut words = message.trim_start_matches('!').split_whitespace();
    let command = words.next()?.to_ascii_lowercase();
    let args = words.map(str::to_string).collect();

    Some(EventPayload::ChatCommand {
        name: name.trim().to_string(),
        external_id: external_id.trim().to_string(),
        channel: channel.to_string(),
        command,
        args,
    })
}
