//! String helpers shared across the bridge
//!
//! XOR obfuscation with a repeating key (used for secrets stored in the
//! configuration) and the date-time rendering used for `refreshedDateTime`
//! nodes.

use chrono::{DateTime, Local, TimeZone};

// ============================================================================
// XOR encoding
// ============================================================================

/// XOR every UTF-16 unit of `input` with the matching unit of the repeating `key`
fn xor_units(key: &str, input: &str) -> String {
    let key: Vec<u16> = key.encode_utf16().collect();
    if key.is_empty() {
        return input.to_string();
    }

    let units: Vec<u16> = input
        .encode_utf16()
        .enumerate()
        .map(|(i, unit)| unit ^ key[i % key.len()])
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a string with the given key
pub fn encode(key: &str, input: &str) -> String {
    xor_units(key, input)
}

/// Decode a string previously encoded with the same key
pub fn decode(key: &str, input: &str) -> String {
    xor_units(key, input)
}

// ============================================================================
// Date-time formatting
// ============================================================================

/// Render a millisecond timestamp as `dd.mm.yyyy HH:MM:SS` in local time
pub fn format_date_time(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => format_in(&dt),
        None => String::new(),
    }
}

fn format_in<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    dt.format("%d.%m.%Y %H:%M:%S").to_string()
}
