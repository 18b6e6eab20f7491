use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

const LOG_TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H.%M.%S";
const LOG_OPENED_TIMESTAMP_FORMAT: &str = "%m/%d/%y %H:%M:%S";
const MAX_FRACTION_DIGITS: usize = 3;

/// Splits `[stamp][frame]body` into the raw stamp and the body.
///
/// Lines without a leading bracket come back with no stamp and the whole
/// (trimmed) line as body. The frame counter bracket is optional.
pub(crate) fn split_timestamp_prefix(line: &str) -> (Option<&str>, &str) {
    let trimmed_line = line
        .trim_start_matches('\u{feff}')
        .trim_end_matches(['\r', '\n']);

    let Some(after_open) = trimmed_line.strip_prefix('[') else {
        return (None, trimmed_line);
    };
    let Some((stamp, rest)) = after_open.split_once(']') else {
        return (None, trimmed_line);
    };

    (Some(stamp), skip_frame_counter(rest))
}

fn skip_frame_counter(rest: &str) -> &str {
    let Some(inner) = rest.strip_prefix('[') else {
        return rest;
    };
    let Some((counter, body)) = inner.split_once(']') else {
        return rest;
    };

    let counter = counter.trim();
    if !counter.is_empty() && counter.bytes().all(|byte| byte.is_ascii_digit()) {
        return body;
    }

    rest
}

/// Parses `YYYY.MM.DD-HH.MM.SS:f` where `f` is a 1-3 digit millisecond count.
///
/// The fraction is not scaled: `:5` is five milliseconds. An unreadable
/// fraction counts as zero; an unreadable integer part rejects the stamp.
pub fn parse_log_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let (integer_part, fraction_part) = match stamp.split_once(':') {
        Some((integer_part, fraction_part)) => (integer_part, Some(fraction_part)),
        None => (stamp, None),
    };

    let naive = NaiveDateTime::parse_from_str(integer_part.trim(), LOG_TIMESTAMP_FORMAT).ok()?;
    let milliseconds = fraction_part.map(parse_milliseconds).unwrap_or(0);

    Some(naive.and_utc() + TimeDelta::milliseconds(milliseconds))
}

fn parse_milliseconds(fraction: &str) -> i64 {
    let digits = fraction.trim();
    if digits.is_empty()
        || digits.len() > MAX_FRACTION_DIGITS
        || !digits.bytes().all(|byte| byte.is_ascii_digit())
    {
        return 0;
    }

    digits.parse::<i64>().unwrap_or(0)
}

/// Parses the `MM/DD/YY HH:MM:SS` stamp of a "Log file open" banner.
pub fn parse_log_opened_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), LOG_OPENED_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
