use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::events::Actor;
use crate::model::{Match, MatchId, MatchPlayerStat, MatchWeaponStat, PlayerId, TeamId};
use crate::players::resolve_player;
use crate::store::StatStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Rejoined,
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Only AI (or nobody) was responsible; nothing is credited.
    NoAttacker,
    Suicide,
    FriendlyFire,
    Kill { pve: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveKind {
    Captured,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Killer,
    Assist,
    FriendlyFire,
    Victim,
    Suicide,
}

/// Marks a player as present in a match, reusing an existing row.
pub fn join_match(
    store: &dyn StatStore,
    match_id: MatchId,
    player_id: PlayerId,
    team: Option<TeamId>,
    at: DateTime<Utc>,
) -> StoreResult<JoinOutcome> {
    let Some(mut stat) = store.find_match_player_stat(match_id, player_id)? else {
        store.create_match_player_stat(&MatchPlayerStat::new(match_id, player_id, team, at))?;
        return Ok(JoinOutcome::Joined);
    };

    if stat.is_connected {
        return Ok(JoinOutcome::AlreadyConnected);
    }

    stat.session_count += 1;
    stat.is_connected = true;
    stat.session_started_at = Some(at);
    if stat.team.is_none() {
        stat.team = team;
    }
    stat.touch(at);
    store.update_match_player_stat(&stat)?;

    Ok(JoinOutcome::Rejoined)
}

/// Returns whether a connected session was actually ended.
pub fn leave_match(
    store: &dyn StatStore,
    match_id: MatchId,
    player_id: PlayerId,
    at: DateTime<Utc>,
) -> StoreResult<bool> {
    let Some(mut stat) = store.find_match_player_stat(match_id, player_id)? else {
        return Ok(false);
    };
    if !stat.is_connected {
        return Ok(false);
    }

    stat.disconnect(at);
    store.update_match_player_stat(&stat)?;
    Ok(true)
}

/// Finds or creates the (match, player) row without opening a new session.
pub fn ensure_match_row(
    store: &dyn StatStore,
    match_id: MatchId,
    player_id: PlayerId,
    team: Option<TeamId>,
    at: DateTime<Utc>,
) -> StoreResult<MatchPlayerStat> {
    if let Some(mut stat) = store.find_match_player_stat(match_id, player_id)? {
        if stat.team.is_none() && team.is_some() {
            stat.team = team;
            store.update_match_player_stat(&stat)?;
        }
        return Ok(stat);
    }

    let stat = MatchPlayerStat::new(match_id, player_id, team, at);
    store.create_match_player_stat(&stat)?;
    Ok(stat)
}

/// Applies one kill line to the match.
///
/// Every credited actor (and a real victim) is resolved and given a match
/// row first; counters are touched afterwards. An actor whose resolution or
/// write fails loses only its own credit.
pub fn apply_kill(
    store: &dyn StatStore,
    record: &Match,
    attackers: &[Actor],
    victim: &Actor,
    weapon: &str,
    at: DateTime<Utc>,
) -> KillOutcome {
    let Some(primary) = attackers.first() else {
        return KillOutcome::NoAttacker;
    };

    let victim_is_player = !victim.is_bot();
    let mut credits: Vec<(&Actor, Role)> = Vec::new();

    let outcome = if victim_is_player && primary.external_id == victim.external_id {
        credits.push((victim, Role::Suicide));
        KillOutcome::Suicide
    } else if victim_is_player && primary.team.is_some() && primary.team == victim.team {
        credits.push((primary, Role::FriendlyFire));
        credits.push((victim, Role::Victim));
        KillOutcome::FriendlyFire
    } else {
        credits.push((primary, Role::Killer));
        let mut credited_ids: HashSet<&str> = HashSet::from([primary.external_id.as_str()]);
        for assistant in &attackers[1..] {
            if credited_ids.insert(assistant.external_id.as_str()) {
                credits.push((assistant, Role::Assist));
            }
        }
        if victim_is_player {
            credits.push((victim, Role::Victim));
        }
        KillOutcome::Kill {
            pve: !victim_is_player,
        }
    };

    let rows: Vec<(&Actor, Role, MatchPlayerStat)> = credits
        .into_iter()
        .filter(|(actor, _)| !actor.is_bot())
        .filter_map(|(actor, role)| match upsert_actor_row(store, record, actor, at) {
            Ok(stat) => Some((actor, role, stat)),
            Err(error) => {
                tracing::warn!(
                    match_id = record.id,
                    player_name = %actor.name,
                    external_id = %actor.external_id,
                    error = %error,
                    "Failed to resolve kill participant; skipping credit"
                );
                None
            }
        })
        .collect();

    for (actor, role, mut stat) in rows {
        match role {
            Role::Killer => stat.kills += 1,
            Role::Assist => stat.assists += 1,
            Role::FriendlyFire => stat.friendly_fire_kills += 1,
            Role::Victim => stat.deaths += 1,
            Role::Suicide => {
                stat.deaths += 1;
                stat.suicides += 1;
            }
        }
        stat.touch(at);

        if let Err(error) = store.update_match_player_stat(&stat) {
            tracing::warn!(
                match_id = record.id,
                player_id = stat.player_id,
                player_name = %actor.name,
                error = %error,
                "Failed to update kill counters"
            );
            continue;
        }

        if matches!(role, Role::Killer | Role::Assist) {
            if let Err(error) = credit_weapon(store, record.id, stat.player_id, weapon, role) {
                tracing::warn!(
                    match_id = record.id,
                    player_id = stat.player_id,
                    weapon = %weapon,
                    error = %error,
                    "Failed to update weapon counters"
                );
            }
        }
    }

    tracing::debug!(match_id = record.id, weapon = %weapon, outcome = ?outcome, "Applied kill");
    outcome
}

/// Credits the first listed player with the objective. Later players get a
/// match row but no counter.
pub fn apply_objective(
    store: &dyn StatStore,
    record: &Match,
    kind: ObjectiveKind,
    objective: &str,
    credited: &[Actor],
    at: DateTime<Utc>,
) -> usize {
    let mut credited_count = 0;

    for (index, actor) in credited.iter().enumerate() {
        if actor.is_bot() {
            continue;
        }

        let mut stat = match upsert_actor_row(store, record, actor, at) {
            Ok(stat) => stat,
            Err(error) => {
                tracing::warn!(
                    match_id = record.id,
                    objective = %objective,
                    player_name = %actor.name,
                    error = %error,
                    "Failed to resolve objective participant; skipping credit"
                );
                continue;
            }
        };

        if index > 0 {
            tracing::debug!(
                match_id = record.id,
                objective = %objective,
                player_id = stat.player_id,
                "Objective assist participation"
            );
            continue;
        }

        match kind {
            ObjectiveKind::Captured => stat.objectives_captured += 1,
            ObjectiveKind::Destroyed => stat.objectives_destroyed += 1,
        }
        stat.touch(at);

        match store.update_match_player_stat(&stat) {
            Ok(()) => credited_count += 1,
            Err(error) => tracing::warn!(
                match_id = record.id,
                objective = %objective,
                player_id = stat.player_id,
                error = %error,
                "Failed to update objective counters"
            ),
        }
    }

    credited_count
}

fn upsert_actor_row(
    store: &dyn StatStore,
    record: &Match,
    actor: &Actor,
    at: DateTime<Utc>,
) -> StoreResult<MatchPlayerStat> {
    let player = resolve_player(store, Some(actor.external_id.as_str()), Some(actor.name.as_str()), at)?;
    ensure_match_row(store, record.id, player.id, actor.team, at)
}

fn credit_weapon(
    store: &dyn StatStore,
    match_id: MatchId,
    player_id: PlayerId,
    weapon: &str,
    role: Role,
) -> StoreResult<()> {
    let mut stat = match store.find_match_weapon_stat(match_id, player_id, weapon)? {
        Some(stat) => stat,
        None => {
            let stat = MatchWeaponStat::new(match_id, player_id, weapon);
            store.create_match_weapon_stat(&stat)?;
            stat
        }
    };

    match role {
        Role::Killer => stat.kills += 1,
        Role::Assist => stat.assists += 1,
        _ => return Ok(()),
    }
    store.update_match_weapon_stat(&stat)
}
