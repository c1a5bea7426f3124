//! EventFeed: append webhook events to the per-location history
//!
//! The feed is stored as a JSON array in `<location>.events.feed` and capped at
//! `max_count` entries; the oldest entries are dropped first.

use std::sync::Arc;

use serde_json::Value;

use crate::codec;
use crate::state::{NodeSpec, StateMirror, StateTree};

pub struct EventFeed {
    tree: Arc<dyn StateTree>,
    mirror: StateMirror,
    max_count: usize,
}

impl EventFeed {
    pub fn new(tree: Arc<dyn StateTree>, max_count: usize) -> Self {
        Self {
            mirror: StateMirror::new(tree.clone()),
            tree,
            max_count: max_count.max(1),
        }
    }

    /// Record a webhook payload; `false` when it lacks `action`, `data` or a location
    pub async fn on_webhook(&self, payload: &Value) -> bool {
        let mut event = payload.clone();

        let action = match event.get("action") {
            Some(Value::Null) | None => return false,
            Some(action) => action.as_str().map(String::from).unwrap_or_else(|| action.to_string()),
        };
        let Some(data) = event.get_mut("data").and_then(Value::as_object_mut) else {
            return false;
        };
        let Some(location_id) = data.get("location_id").and_then(Value::as_str).map(String::from)
        else {
            return false;
        };

        tracing::debug!("[Events] LISTENER: {}", payload);
        tracing::info!(
            "[Events] Received data from the webhook listener (action -{}-).",
            action
        );

        // A caller-supplied timestamp stays in the event even when unusable
        let now = chrono::Utc::now().timestamp();
        let timestamp = match data.get("timestamp").filter(|v| !v.is_null()).cloned() {
            None => {
                data.insert("timestamp".into(), Value::from(now));
                now
            }
            Some(raw) => timestamp_secs(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    "[Events] Unusable timestamp {} in {} event, using current time",
                    raw,
                    action
                );
                now
            }),
        };

        let base = format!("{}.events", location_id);
        self.mirror
            .set(
                &NodeSpec::new(format!("{}.refreshedTimestamp", base))
                    .description("Timestamp of the last event")
                    .role("value"),
                timestamp,
            )
            .await;
        self.mirror
            .set(
                &NodeSpec::new(format!("{}.refreshedDateTime", base))
                    .description("DateTime of the last event")
                    .role("text"),
                codec::format_date_time(timestamp * 1000),
            )
            .await;

        let feed_id = format!("{}.feed", base);
        let mut feed = self.load_feed(&feed_id).await;
        if feed.len() >= self.max_count {
            let keep = self.max_count - 1;
            feed.drain(..feed.len() - keep);
        }
        feed.push(event);

        let serialized = Value::Array(feed).to_string();
        self.mirror
            .set(
                &NodeSpec::new(feed_id)
                    .description("Activity feed / Event history")
                    .role("json"),
                serialized,
            )
            .await;

        true
    }

    async fn load_feed(&self, feed_id: &str) -> Vec<Value> {
        let state = match self.tree.get_state(feed_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("[Events] Reading {} failed: {}", feed_id, e);
                None
            }
        };

        match state.map(|s| s.val) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                match serde_json::from_str::<Vec<Value>>(&text) {
                    Ok(feed) => feed,
                    Err(e) => {
                        tracing::warn!("[Events] Discarding unreadable feed {}: {}", feed_id, e);
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        }
    }
}

/// Epoch seconds from a number or numeric string, if chrono can represent it
fn timestamp_secs(value: &Value) -> Option<i64> {
    let secs = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    secs.checked_mul(1000)
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|_| secs)
}
