//! Data models for the nello bridge

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TimeWindowRequestError;
use crate::ical;

// ============================================================================
// Location Models
// ============================================================================

/// Location as returned by `GET /locations/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiLocation {
    pub location_id: String,
    pub address: RawAddress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAddress {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub number: Value,
    #[serde(default)]
    pub zip: Value,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Normalized address mirrored under `<location>.address`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Address {
    pub street_name: String,
    pub street_number: String,
    pub street: String,
    pub address: String,
    pub zip: String,
    pub city: String,
    pub country: String,
    pub state: Option<String>,
}

impl From<RawAddress> for Address {
    fn from(raw: RawAddress) -> Self {
        let street_name = raw.street.trim().to_string();
        let street_number = value_text(&raw.number);
        let zip = value_text(&raw.zip);

        Self {
            street: format!("{} {}", street_name, street_number),
            address: format!("{} {}, {} {}", street_name, street_number, zip, raw.city),
            street_name,
            street_number,
            zip,
            city: raw.city,
            country: raw.country,
            state: raw.state,
        }
    }
}

impl Address {
    /// Node keys and values in the order they are mirrored
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("streetName", self.street_name.clone()),
            ("streetNumber", self.street_number.clone()),
            ("street", self.street.clone()),
            ("address", self.address.clone()),
            ("zip", self.zip.clone()),
            ("city", self.city.clone()),
            ("country", self.country.clone()),
        ];
        if let Some(ref state) = self.state {
            fields.push(("state", state.clone()));
        }
        fields
    }
}

/// Numbers and strings both render as plain text; anything else is empty
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

// ============================================================================
// Time Window Models
// ============================================================================

/// Time window as returned by `GET /locations/{id}/tw/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub image: Value,
    #[serde(default)]
    pub ical: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TimeWindow {
    /// Scalar fields published under `<location>.timeWindows.<id>`
    ///
    /// The calendar is split into `icalRaw` and `icalObj`; unknown scalar
    /// fields sent by the vendor are carried along.
    pub fn mirrored_fields(&self) -> Vec<(String, Value)> {
        let (raw, object) = ical::split_calendar(&self.ical);

        let mut fields = vec![
            ("id".to_string(), Value::String(self.id.clone())),
            ("name".to_string(), Value::String(self.name.clone())),
            ("enabled".to_string(), Value::Bool(self.enabled)),
            ("state".to_string(), self.state.clone()),
            ("image".to_string(), self.image.clone()),
            ("icalRaw".to_string(), Value::String(raw)),
            ("icalObj".to_string(), Value::String(object)),
        ];

        for (key, value) in &self.extra {
            if !value.is_object() && !value.is_array() {
                fields.push((key.clone(), value.clone()));
            }
        }
        fields
    }
}

/// Payload accepted by the `createTimeWindow` control node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeWindowRequest {
    pub name: String,
    pub ical: String,
}

impl TimeWindowRequest {
    /// Validate a control-node value (JSON text or an already decoded object)
    pub fn parse(input: &Value) -> Result<Self, TimeWindowRequestError> {
        let data = match input {
            Value::String(text) => serde_json::from_str::<Value>(text)
                .map_err(|e| TimeWindowRequestError::Parse(e.to_string()))?,
            other => other.clone(),
        };

        if !data.is_object() {
            return Err(TimeWindowRequestError::Parse(
                "expected a JSON object".to_string(),
            ));
        }

        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or(TimeWindowRequestError::MissingName)?;

        let ical = data
            .get("ical")
            .and_then(Value::as_str)
            .filter(|ical| ical::has_required_markers(ical))
            .ok_or(TimeWindowRequestError::InvalidCalendar)?;

        Ok(Self {
            name: name.to_string(),
            ical: ical.to_string(),
        })
    }
}
