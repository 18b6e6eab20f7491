pub mod classifier;
pub mod normalize;
pub mod timestamp;
pub mod weapon;

use crate::events::DomainEvent;

pub use classifier::{classify, ClassifiedLine, LineKind, RawEvent};
pub use normalize::{normalize, parse_actor_list, parse_map_url};
pub use weapon::normalize_weapon_name;

/// Classifies and normalizes one log line for `server_id`.
pub fn parse_line(line: &str, server_id: &str) -> Option<DomainEvent> {
    let Some(classified) = classify(line) else {
        tracing::trace!(server_id = %server_id, "Dropping unrecognised log line");
        return None;
    };

    let event = normalize(&classified, server_id);
    if event.is_none() {
        tracing::debug!(
            server_id = %server_id,
            line_kind = ?classified.kind,
            "Dropping log line with unusable fields"
        );
    }

    event
}
