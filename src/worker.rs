use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::aggregator::{self, JoinOutcome, ObjectiveKind};
use crate::commands::{self, ChatCommandKind};
use crate::error::StoreResult;
use crate::events::{Actor, DomainEvent, EventPayload, MapContext};
use crate::lifecycle::MatchLifecycle;
use crate::model::{Match, Server};
use crate::parser::parse_line;
use crate::players::{record_player_address, resolve_player};
use crate::remote::Notifier;
use crate::store::StatStore;

/// Per-server pipeline state. Events of one server are applied strictly in
/// line order by the single task that owns this value.
pub struct ServerWorker {
    server: Server,
    store: Arc<dyn StatStore>,
    lifecycle: MatchLifecycle,
    pending_address: Option<String>,
    notifier: Option<Notifier>,
    announce_joins: bool,
}

impl ServerWorker {
    /// Registers `server` in the store and adopts its active match, if any.
    pub fn start(server: Server, store: Arc<dyn StatStore>) -> StoreResult<Self> {
        store.upsert_server(&server)?;
        let lifecycle = MatchLifecycle::resume(store.as_ref(), &server)?;

        tracing::info!(
            server_id = %server.id,
            log_path = %server.log_path.display(),
            "Server worker started"
        );

        Ok(Self {
            server,
            store,
            lifecycle,
            pending_address: None,
            notifier: None,
            announce_joins: false,
        })
    }

    pub fn with_notifier(mut self, notifier: Notifier, announce_joins: bool) -> Self {
        self.notifier = Some(notifier);
        self.announce_joins = announce_joins;
        self
    }

    /// Makes everything applied so far durable in the store.
    pub fn flush(&self) -> StoreResult<()> {
        self.store.flush()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn active_match(&self) -> Option<&Match> {
        self.lifecycle.active_match()
    }

    /// Applies every recognised line of a batch; returns how many were
    /// turned into events.
    pub fn process_batch<S: AsRef<str>>(&mut self, lines: &[S]) -> usize {
        let mut handled = 0;
        for line in lines {
            if self.process_line(line.as_ref()) {
                handled += 1;
            }
        }

        tracing::debug!(
            server_id = %self.server.id,
            line_count = lines.len(),
            handled_count = handled,
            "Processed log batch"
        );
        handled
    }

    pub fn process_line(&mut self, line: &str) -> bool {
        let Some(event) = parse_line(line, &self.server.id) else {
            return false;
        };
        self.apply(&event);
        true
    }

    pub fn apply(&mut self, event: &DomainEvent) {
        tracing::debug!(
            server_id = %self.server.id,
            event_kind = event.payload.kind_label(),
            at = %event.at,
            "Applying event"
        );

        let at = event.at;
        match &event.payload {
            EventPayload::MapLoad(context) => self.on_map_transition(context, at, false),
            EventPayload::MapTravel(context) => self.on_map_transition(context, at, true),
            EventPayload::PlayerConnection { address } => {
                self.pending_address = Some(address.clone());
            }
            EventPayload::PlayerLogin { name, external_id } => {
                self.on_login(name, external_id, at)
            }
            EventPayload::PlayerRegister { external_id } => {
                if let Err(error) = resolve_player(self.store.as_ref(), Some(external_id.as_str()), None, at) {
                    self.warn_player_failure(external_id, &error, "Failed to register player");
                }
            }
            EventPayload::PlayerJoin { name } => self.on_join(name, at),
            EventPayload::PlayerLeave { external_id } => self.on_leave(external_id, at),
            EventPayload::PlayerKill {
                attackers,
                victim,
                weapon,
            } => self.on_kill(attackers, victim, weapon, at),
            EventPayload::ObjectiveCaptured {
                objective,
                credited,
                ..
            } => self.on_objective(ObjectiveKind::Captured, objective, credited, at),
            EventPayload::ObjectiveDestroyed {
                objective,
                credited,
                ..
            } => self.on_objective(ObjectiveKind::Destroyed, objective, credited, at),
            EventPayload::RoundStart { round } => {
                self.lifecycle.on_round_start(self.store.as_ref(), *round, at)
            }
            EventPayload::RoundEnd {
                round,
                winner_team,
                reason,
            } => {
                tracing::debug!(
                    server_id = %self.server.id,
                    round = *round,
                    winner_team = ?winner_team,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "Round ended"
                );
                self.lifecycle
                    .on_round_end(self.store.as_ref(), *round, *winner_team, at)
            }
            EventPayload::GameOver => self.lifecycle.on_game_over(self.store.as_ref(), at),
            EventPayload::LogFileOpened => {
                tracing::info!(server_id = %self.server.id, opened_at = %at, "Log file reopened");
                self.pending_address = None;
                self.lifecycle.on_log_reopened();
            }
            EventPayload::ChatCommand {
                name,
                external_id,
                command,
                ..
            } => self.on_chat_command(name, external_id, command, at),
        }
    }

    fn on_map_transition(&mut self, context: &MapContext, at: DateTime<Utc>, via_travel: bool) {
        if let Err(error) = self
            .lifecycle
            .on_map_transition(self.store.as_ref(), context, at, via_travel)
        {
            tracing::warn!(
                server_id = %self.server.id,
                map = %context.map,
                error = %error,
                "Failed to switch match on map transition"
            );
        }
    }

    fn on_login(&mut self, name: &str, external_id: &str, at: DateTime<Utc>) {
        let mut player = match resolve_player(self.store.as_ref(), Some(external_id), Some(name), at) {
            Ok(player) => player,
            Err(error) => {
                self.warn_player_failure(external_id, &error, "Failed to resolve logging-in player");
                return;
            }
        };

        let Some(address) = self.pending_address.take() else {
            return;
        };
        if let Err(error) = record_player_address(self.store.as_ref(), &mut player, &address) {
            tracing::warn!(
                server_id = %self.server.id,
                player_id = player.id,
                error = %error,
                "Failed to record player address"
            );
        }
    }

    fn on_join(&mut self, name: &str, at: DateTime<Utc>) {
        let player = match resolve_player(self.store.as_ref(), None, Some(name), at) {
            Ok(player) => player,
            Err(error) => {
                self.warn_player_failure(name, &error, "Failed to resolve joining player");
                return;
            }
        };

        let Some(record) = self.match_for_event(at) else {
            return;
        };

        let outcome = match aggregator::join_match(self.store.as_ref(), record.id, player.id, None, at) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    server_id = %self.server.id,
                    match_id = record.id,
                    player_id = player.id,
                    error = %error,
                    "Failed to add player to match"
                );
                return;
            }
        };
        self.lifecycle.record_activity(self.store.as_ref(), at);

        tracing::debug!(
            server_id = %self.server.id,
            match_id = record.id,
            player_id = player.id,
            outcome = ?outcome,
            "Player joined match"
        );

        if !self.announce_joins || outcome == JoinOutcome::AlreadyConnected {
            return;
        }
        if let Some(notifier) = self.notifier.as_ref() {
            notifier.say(&commands::join_greeting(&player, outcome == JoinOutcome::Rejoined));
        }
    }

    fn on_leave(&mut self, external_id: &str, at: DateTime<Utc>) {
        if self.lifecycle.is_travel_reconnect(at) {
            tracing::debug!(
                server_id = %self.server.id,
                external_id = %external_id,
                "Ignoring disconnect during map travel"
            );
            return;
        }

        let Some(match_id) = self.lifecycle.active_match().map(|record| record.id) else {
            return;
        };

        let player = match self.store.find_player_by_external_id(external_id) {
            Ok(Some(player)) => player,
            Ok(None) => {
                tracing::debug!(
                    server_id = %self.server.id,
                    external_id = %external_id,
                    "Disconnect for unknown player"
                );
                return;
            }
            Err(error) => {
                self.warn_player_failure(external_id, &error, "Failed to look up leaving player");
                return;
            }
        };

        match aggregator::leave_match(self.store.as_ref(), match_id, player.id, at) {
            Ok(true) => self.lifecycle.record_activity(self.store.as_ref(), at),
            Ok(false) => {}
            Err(error) => tracing::warn!(
                server_id = %self.server.id,
                match_id,
                player_id = player.id,
                error = %error,
                "Failed to remove player from match"
            ),
        }
    }

    fn on_kill(&mut self, attackers: &[Actor], victim: &Actor, weapon: &str, at: DateTime<Utc>) {
        if attackers.is_empty() {
            tracing::debug!(server_id = %self.server.id, "Kill without a player attacker");
            return;
        }

        let Some(record) = self.match_for_event(at) else {
            return;
        };
        aggregator::apply_kill(self.store.as_ref(), &record, attackers, victim, weapon, at);
        self.lifecycle.record_activity(self.store.as_ref(), at);
    }

    fn on_objective(
        &mut self,
        kind: ObjectiveKind,
        objective: &str,
        credited: &[Actor],
        at: DateTime<Utc>,
    ) {
        let Some(record) = self.match_for_event(at) else {
            return;
        };
        aggregator::apply_objective(self.store.as_ref(), &record, kind, objective, credited, at);
        self.lifecycle.record_activity(self.store.as_ref(), at);
    }

    fn on_chat_command(&mut self, name: &str, external_id: &str, command: &str, at: DateTime<Utc>) {
        let Some(kind) = ChatCommandKind::parse(command) else {
            tracing::debug!(server_id = %self.server.id, command = %command, "Ignoring unknown chat command");
            return;
        };
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let Some(record) = self.lifecycle.active_match().cloned() else {
            notifier.say("No match in progress");
            return;
        };

        let reply = resolve_player(self.store.as_ref(), Some(external_id), Some(name), at)
            .and_then(|caller| commands::reply(self.store.as_ref(), kind, &record, &caller));
        match reply {
            Ok(reply) => notifier.say(&reply),
            Err(error) => self.warn_player_failure(external_id, &error, "Failed to answer chat command"),
        }
    }

    /// Active match for a stat-bearing event, recovered from the log when the
    /// worker has none.
    fn match_for_event(&mut self, at: DateTime<Utc>) -> Option<Match> {
        match self.lifecycle.ensure_active_match(self.store.as_ref(), at) {
            Ok(record) => Some(record.clone()),
            Err(error) => {
                tracing::warn!(
                    server_id = %self.server.id,
                    error = %error,
                    "Failed to find or open a match for event"
                );
                None
            }
        }
    }

    fn warn_player_failure(&self, player_key: &str, error: &dyn std::fmt::Display, message: &str) {
        tracing::warn!(
            server_id = %self.server.id,
            player = %player_key,
            error = %error,
            "{message}"
        );
    }
}
