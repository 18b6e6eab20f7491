use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{Result, StatsError};
use crate::events::MapContext;
use crate::parser::classifier::{classify, is_map_transition, LineKind, RawEvent};
use crate::parser::normalize::parse_map_url;

/// A map transition found by scanning a log file backward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredMap {
    pub context: MapContext,
    pub at: DateTime<Utc>,
    pub via_travel: bool,
}

/// Finds the most recent map transition at or before `at` in `log_path`.
///
/// Lines are read newest first. When a map-load and a map-travel share the
/// winning timestamp the travel wins, since it means the server left its
/// default map.
pub fn find_last_map_transition(log_path: &Path, at: DateTime<Utc>) -> Result<Option<RecoveredMap>> {
    let raw_bytes = std::fs::read(log_path).map_err(|error| StatsError::io(log_path, error))?;
    let content = String::from_utf8_lossy(&raw_bytes);

    Ok(scan_backward(content.lines().rev(), at))
}

fn scan_backward<'a>(lines: impl Iterator<Item = &'a str>, at: DateTime<Utc>) -> Option<RecoveredMap> {
    let mut found: Option<RecoveredMap> = None;

    for line in lines {
        let Some(classified) = classify(line) else {
            continue;
        };

        if let Some(candidate) = found.as_ref() {
            if classified.at != candidate.at || candidate.via_travel {
                break;
            }
        }

        if !is_map_transition(classified.kind) || classified.at > at {
            continue;
        }

        let url = match classified.event {
            RawEvent::MapTravel { url } | RawEvent::MapLoad { url } => url,
            _ => continue,
        };
        let Some(context) = parse_map_url(url) else {
            continue;
        };

        let via_travel = classified.kind == LineKind::MapTravel;
        match found.as_ref() {
            None => {
                found = Some(RecoveredMap {
                    context,
                    at: classified.at,
                    via_travel,
                });
            }
            Some(_) if via_travel => {
                found = Some(RecoveredMap {
                    context,
                    at: classified.at,
                    via_travel,
                });
                break;
            }
            Some(_) => {}
        }
    }

    found
}
