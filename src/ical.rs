//! Calendar payload handling for time windows
//!
//! The vendor hands the calendar either as raw iCal text or as an already
//! parsed object carrying the text under `_raw`. Both are split into the raw
//! text and a JSON object without the raw field.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

const RAW_FIELD: &str = "_raw";

/// Markers every calendar accepted for creation must contain
pub const REQUIRED_MARKERS: [&str; 4] = [
    "BEGIN:VCALENDAR",
    "END:VCALENDAR",
    "BEGIN:VEVENT",
    "END:VEVENT",
];

pub fn has_required_markers(ical: &str) -> bool {
    REQUIRED_MARKERS.iter().all(|marker| ical.contains(marker))
}

/// Split a calendar payload into `(raw text, JSON of the structural form)`
pub fn split_calendar(ical: &Value) -> (String, String) {
    let (raw, object) = match ical {
        Value::Object(map) => {
            let mut object = map.clone();
            let raw = match object.remove(RAW_FIELD) {
                Some(Value::String(s)) => s,
                _ => String::new(),
            };
            (raw, object)
        }
        Value::String(raw) => (raw.clone(), parse_event(raw)),
        _ => (String::new(), Map::new()),
    };

    let json = serde_json::to_string(&Value::Object(object)).unwrap_or_else(|_| "{}".into());
    (raw, json)
}

fn property_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9-]+)((?:;[^:]*)?):(.*)$").expect("static regex")
    })
}

/// Collect the properties of the first VEVENT into a flat object with
/// lower-cased keys
fn parse_event(raw: &str) -> Map<String, Value> {
    // Unfold continuation lines (RFC 5545 §3.1)
    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        match line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
            Some(rest) if !lines.is_empty() => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(rest);
                }
            }
            _ => lines.push(line.to_string()),
        }
    }

    let mut event = Map::new();
    let mut in_event = false;
    for line in &lines {
        match line.as_str() {
            "BEGIN:VEVENT" => {
                in_event = true;
                event.insert("type".into(), Value::String("VEVENT".into()));
            }
            "END:VEVENT" => break,
            _ if in_event => {
                if let Some(caps) = property_line().captures(line) {
                    let key = caps[1].to_lowercase();
                    if key == "begin" || key == "end" {
                        continue;
                    }
                    event.insert(key, Value::String(caps[3].to_string()));
                }
            }
            _ => {}
        }
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nDTSTART;TZID=Europe/Berlin:20180101T080000\r\nDTEND;TZID=Europe/Berlin:20180101T170000\r\nRRULE:FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR\r\nSUMMARY:Cleaning\r\n  service\r\nEND:VEVENT\r\nEND:VCALENDAR";

    #[test]
    fn test_markers() {
        assert!(has_required_markers(SAMPLE));
        assert!(!has_required_markers(&SAMPLE.replace("BEGIN:VCALENDAR", "")));
    }

    #[test]
    fn test_split_object_form_drops_raw() {
        let ical = json!({"_raw": "BEGIN:VCALENDAR", "summary": "Work", "rrule": "FREQ=DAILY"});
        let (raw, obj) = split_calendar(&ical);

        assert_eq!(raw, "BEGIN:VCALENDAR");
        let parsed: Value = serde_json::from_str(&obj).unwrap();
        assert_eq!(parsed, json!({"summary": "Work", "rrule": "FREQ=DAILY"}));
    }

    #[test]
    fn test_split_text_form_parses_event() {
        let (raw, obj) = split_calendar(&Value::String(SAMPLE.into()));

        assert_eq!(raw, SAMPLE);
        let parsed: Value = serde_json::from_str(&obj).unwrap();
        assert_eq!(parsed["type"], "VEVENT");
        assert_eq!(parsed["dtstart"], "20180101T080000");
        assert_eq!(parsed["rrule"], "FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR");
        assert_eq!(parsed["summary"], "Cleaning service");
        assert!(parsed.get("version").is_none());
    }

    #[test]
    fn test_split_missing_calendar() {
        assert_eq!(split_calendar(&Value::Null), (String::new(), "{}".to_string()));
    }
}
