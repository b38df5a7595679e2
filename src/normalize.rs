//! Canonicalisation helpers used at every persistence boundary.
//!
//! Two concerns live here: the recursive snapshot normaliser that guarantees
//! a pending-action blob is JSON-native before it reaches the session store,
//! and the enum/date/time canonicalisers the tool layer applies to every
//! mutating input.

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Number, Value};

/// Recursively normalise a value so it can be stored and later deserialised
/// byte-for-byte. Non-finite floats become null; map keys and everything else
/// pass through unchanged. Values built from chrono types must already be
/// strings (use [`date_str`] / [`time_str`] when assembling snapshots).
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.as_i64().is_none() && n.as_u64().is_none() && !f.is_finite() => Value::Null,
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(entries) => {
            let mut out = Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k, normalize(v));
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// Canonical `YYYY-MM-DD` string for persistence.
pub fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Canonical `HH:MM` string for persistence.
pub fn time_str(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Parse a time of day. Accepts `HH:MM`, `H:MM`, and a trailing am/pm marker
/// ("7:30 pm"). Bare hours ("7am") are accepted too.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let raw = s.trim().to_ascii_lowercase();
    let (body, pm) = if let Some(stripped) = raw.strip_suffix("pm") {
        (stripped.trim().to_string(), Some(true))
    } else if let Some(stripped) = raw.strip_suffix("am") {
        (stripped.trim().to_string(), Some(false))
    } else {
        (raw, None)
    };

    let (hour, minute) = match body.split_once(':') {
        Some((h, m)) => (h.trim().parse::<u32>().ok()?, m.trim().parse::<u32>().ok()?),
        None => (body.trim().parse::<u32>().ok()?, 0),
    };

    let hour = match pm {
        Some(true) if hour < 12 => hour + 12,
        Some(false) if hour == 12 => 0,
        _ => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Match `input` case-insensitively against a canonical spelling list,
/// returning the canonical casing. Spaces and dashes match underscores.
pub fn canonical_enum(input: &str, canonical: &'static [&'static str]) -> Option<&'static str> {
    let folded: String = input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    canonical
        .iter()
        .copied()
        .find(|c| c.to_ascii_lowercase() == folded)
}

/// Convert a number-ish JSON value to i64, tolerating string encodings.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Build a JSON number from f64, mapping non-finite input to null.
pub fn finite_number(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_normalize_passthrough() {
        let value = json!({
            "action": "remove_vehicle",
            "trip_id": 5,
            "consequences": {"booking_count": 8, "booking_percentage": 0.2},
            "dates": ["2026-08-01", {"at": "07:30"}],
        });
        assert_eq!(normalize(value.clone()), value);
    }

    #[test]
    fn test_normalize_round_trip_nested() {
        let value = json!({
            "wizard": {"data": {"trip_date": "2026-08-02", "stops": [1, 2, {"pos": 3}]}},
        });
        let normalized = normalize(value);
        let text = serde_json::to_string(&normalized).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, normalized);
    }

    #[test]
    fn test_parse_time_forms() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(parse_time("07:30"), Some(t(7, 30)));
        assert_eq!(parse_time("7:30"), Some(t(7, 30)));
        assert_eq!(parse_time("7:30 pm"), Some(t(19, 30)));
        assert_eq!(parse_time("12:15am"), Some(t(0, 15)));
        assert_eq!(parse_time("7am"), Some(t(7, 0)));
        assert_eq!(parse_time("half past"), None);
        assert_eq!(parse_time("25:00"), None);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2026-08-01"), NaiveDate::from_ymd_opt(2026, 8, 1));
        assert_eq!(parse_date("01/08/2026"), None);
    }

    #[test]
    fn test_canonical_enum_casing() {
        const VEHICLE_TYPES: &[&str] = &["Bus", "Cab"];
        assert_eq!(canonical_enum("bus", VEHICLE_TYPES), Some("Bus"));
        assert_eq!(canonical_enum("BUS", VEHICLE_TYPES), Some("Bus"));
        assert_eq!(canonical_enum("tram", VEHICLE_TYPES), None);

        const DIRECTIONS: &[&str] = &["up", "down"];
        assert_eq!(canonical_enum("UP", DIRECTIONS), Some("up"));

        const STATUSES: &[&str] = &["IN_PROGRESS", "SCHEDULED"];
        assert_eq!(canonical_enum("in progress", STATUSES), Some("IN_PROGRESS"));
    }

    #[test]
    fn test_canonical_time_and_date_strings() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let time = NaiveTime::from_hms_opt(7, 5, 0).unwrap();
        assert_eq!(date_str(date), "2026-08-01");
        assert_eq!(time_str(time), "07:05");
    }
}
