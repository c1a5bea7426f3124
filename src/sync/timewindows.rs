//! TimeWindowReconciler: mirror the time windows of a location
//!
//! A refresh cycle purges everything under `<location>.timeWindows`, fetches
//! the current list from nello and republishes it together with the control
//! nodes used to create and delete time windows.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::models::{TimeWindow, TimeWindowRequest};
use crate::nello::LockApi;
use crate::state::{NodeSpec, State, StateMirror, StateTree};
use crate::sync::AdapterContext;

pub const INDEX_NODE: &str = "indexedTimeWindows";
pub const CREATE_NODE: &str = "createTimeWindow";
pub const DELETE_NODE: &str = "deleteTimeWindow";
pub const DELETE_ALL_NODE: &str = "deleteAllTimeWindows";

pub struct TimeWindowReconciler {
    ctx: Arc<AdapterContext>,
    tree: Arc<dyn StateTree>,
    mirror: StateMirror,
    api: Arc<dyn LockApi>,
}

impl TimeWindowReconciler {
    pub fn new(ctx: Arc<AdapterContext>, tree: Arc<dyn StateTree>, api: Arc<dyn LockApi>) -> Self {
        Self {
            ctx,
            mirror: StateMirror::new(tree.clone()),
            tree,
            api,
        }
    }

    /// Full cycle: purge, then fetch and publish
    pub async fn refresh(&self, location_id: &str) -> bool {
        self.purge(location_id).await;
        self.fetch_and_publish(location_id).await
    }

    /// Delete every node under `<location>.timeWindows` and forget the cached windows
    pub async fn purge(&self, location_id: &str) {
        let prefix = format!("{}.timeWindows.", location_id);
        match self.tree.objects_under(&prefix).await {
            Ok(ids) => {
                for id in ids {
                    if let Err(e) = self.tree.del_object(&id).await {
                        tracing::error!("[TimeWindows] Deleting {} failed: {}", id, e);
                    }
                }
            }
            Err(e) => tracing::error!("[TimeWindows] Listing {} failed: {}", prefix, e),
        }
        self.ctx.clear_time_windows(location_id).await;
    }

    /// Fetch the current windows and publish them; `false` when the fetch failed
    pub async fn fetch_and_publish(&self, location_id: &str) -> bool {
        let windows = match self.api.get_time_windows(location_id).await {
            Ok(windows) => windows,
            Err(e) => {
                tracing::error!(
                    "[TimeWindows] Fetching time windows of location {} failed: {}",
                    location_id,
                    e
                );
                return false;
            }
        };

        let address = self.ctx.address_label(location_id).await;
        tracing::info!(
            "[TimeWindows] Updating {} time windows of location {}.",
            windows.len(),
            address
        );

        self.ctx
            .replace_time_windows(location_id, windows.clone())
            .await;

        for window in &windows {
            self.publish_window(location_id, &address, window).await;
        }

        let base = format!("{}.timeWindows", location_id);
        let index = windows
            .iter()
            .map(|w| w.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        self.mirror
            .set(
                &NodeSpec::new(format!("{}.{}", base, INDEX_NODE))
                    .description("Index of all time windows")
                    .role("text"),
                index,
            )
            .await;

        let create_id = format!("{}.{}", base, CREATE_NODE);
        self.mirror
            .ensure(
                &NodeSpec::new(&create_id)
                    .description(format!("Creating a time window for location {}", address))
                    .common("locationId", location_id)
                    .common("role", "json")
                    .common("type", "string")
                    .writable(),
            )
            .await;
        self.tree.subscribe(&create_id).await;

        let delete_all_id = format!("{}.{}", base, DELETE_ALL_NODE);
        self.mirror
            .set(
                &NodeSpec::new(&delete_all_id)
                    .description(format!("Delete all time windows of location {}", address))
                    .common("locationId", location_id)
                    .common("role", "button.delete")
                    .common("type", "boolean")
                    .writable(),
                false,
            )
            .await;
        self.tree.subscribe(&delete_all_id).await;

        true
    }

    async fn publish_window(&self, location_id: &str, address: &str, window: &TimeWindow) {
        let base = format!("{}.timeWindows.{}", location_id, window.id);

        self.mirror
            .set(
                &NodeSpec::new(&base).description(format!("Time Window: {}", window.name)),
                "",
            )
            .await;

        for (key, value) in window.mirrored_fields() {
            let spec = NodeSpec::known(format!("{}.{}", base, key), &format!("timeWindows.{}", key));
            self.mirror.set(&spec, value).await;
        }

        let delete_id = format!("{}.{}", base, DELETE_NODE);
        self.mirror
            .set(
                &NodeSpec::new(&delete_id)
                    .description(format!(
                        "Delete the time window {} of location {}",
                        window.id, address
                    ))
                    .common("locationId", location_id)
                    .common("timeWindowId", window.id.as_str())
                    .common("role", "button.delete")
                    .common("type", "boolean")
                    .writable(),
                false,
            )
            .await;
        self.tree.subscribe(&delete_id).await;
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Handle a value written to a `createTimeWindow` control node
    pub async fn create(&self, control_id: &str, value: &Value) {
        if let Some(location_id) = self.control_attr(control_id, "locationId").await {
            self.create_for(&location_id, value).await;
        }

        // Fire once: clear the control whatever happened
        if let Err(e) = self
            .tree
            .set_state(control_id, State::new(Value::Null, true))
            .await
        {
            tracing::error!("[TimeWindows] Failed to reset {}: {}", control_id, e);
        }
    }

    async fn create_for(&self, location_id: &str, value: &Value) {
        let request = match TimeWindowRequest::parse(value) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("[TimeWindows] {}", e);
                return;
            }
        };

        tracing::info!(
            "[TimeWindows] Triggered to create time window of location {} ({}).",
            self.ctx.address_label(location_id).await,
            location_id
        );

        match self.api.create_time_window(location_id, &request).await {
            Ok(id) => {
                tracing::info!("[TimeWindows] Time window with id {} was created.", id);
                self.fetch_and_publish(location_id).await;
            }
            Err(e) => {
                tracing::error!("[TimeWindows] Creation for time window failed: {}", e);
            }
        }
    }

    /// Handle a write to a per-window `deleteTimeWindow` control node
    pub async fn delete_one(&self, control_id: &str) {
        let (Some(location_id), Some(time_window_id)) = (
            self.control_attr(control_id, "locationId").await,
            self.control_attr(control_id, "timeWindowId").await,
        ) else {
            return;
        };

        tracing::info!(
            "[TimeWindows] Triggered to delete time window ({}) of location {} ({}).",
            time_window_id,
            self.ctx.address_label(&location_id).await,
            location_id
        );

        match self
            .api
            .delete_time_window(&location_id, &time_window_id)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "[TimeWindows] Time window with id {} was deleted.",
                    time_window_id
                );
                self.remove_subtree(&format!("{}.timeWindows.{}", location_id, time_window_id))
                    .await;
                self.ctx
                    .remove_time_window(&location_id, &time_window_id)
                    .await;
                self.fetch_and_publish(&location_id).await;
            }
            Err(e) => {
                tracing::error!("[TimeWindows] Deleting time window failed: {}", e);
            }
        }
    }

    /// Handle a write to the `deleteAllTimeWindows` control node
    ///
    /// Deletions run concurrently; once all of them settled the location is
    /// refreshed exactly once, also when there was nothing to delete.
    pub async fn delete_all(&self, control_id: &str) {
        let Some(location_id) = self.control_attr(control_id, "locationId").await else {
            return;
        };
        let ids = self.ctx.time_window_ids(&location_id).await;

        tracing::info!(
            "[TimeWindows] Triggered to delete all {} time windows of location {} ({}).",
            ids.len(),
            self.ctx.address_label(&location_id).await,
            location_id
        );

        let location = location_id.as_str();
        let results = join_all(ids.iter().map(|id| async move {
            (id, self.api.delete_time_window(location, id).await)
        }))
        .await;

        let mut failed = 0usize;
        for (id, result) in results {
            match result {
                Ok(()) => tracing::info!("[TimeWindows] Time window with id {} was deleted.", id),
                Err(e) => {
                    failed += 1;
                    tracing::error!("[TimeWindows] Deleting time window {} failed: {}", id, e);
                }
            }
        }

        if failed == 0 {
            tracing::info!("[TimeWindows] All time windows have been deleted.");
        }
        self.refresh(&location_id).await;
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn control_attr(&self, control_id: &str, key: &str) -> Option<String> {
        match self.tree.get_object(control_id).await {
            Ok(Some(object)) => {
                let value = object.common_str(key).map(String::from);
                if value.is_none() {
                    tracing::warn!("[TimeWindows] Control {} carries no {}", control_id, key);
                }
                value
            }
            Ok(None) => {
                tracing::warn!("[TimeWindows] Control {} does not exist", control_id);
                None
            }
            Err(e) => {
                tracing::error!("[TimeWindows] Lookup of {} failed: {}", control_id, e);
                None
            }
        }
    }

    /// Delete `root` and every object below it
    async fn remove_subtree(&self, root: &str) {
        let mut ids = match self.tree.objects_under(&format!("{}.", root)).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("[TimeWindows] Listing {} failed: {}", root, e);
                Vec::new()
            }
        };
        ids.push(root.to_string());

        for id in ids {
            if let Err(e) = self.tree.del_object(&id).await {
                tracing::error!("[TimeWindows] Deleting {} failed: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;
    use crate::nello::fake::FakeLockApi;
    use crate::state::MemoryStateTree;
    use serde_json::json;

    const ICAL: &str = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nEND:VEVENT\nEND:VCALENDAR";

    struct Harness {
        tree: Arc<MemoryStateTree>,
        api: Arc<FakeLockApi>,
        ctx: Arc<AdapterContext>,
        reconciler: TimeWindowReconciler,
    }

    async fn harness(ids: &[&str]) -> Harness {
        let tree = Arc::new(MemoryStateTree::new());
        let api = Arc::new(FakeLockApi::with_windows(ids));
        let ctx = Arc::new(AdapterContext::new());
        ctx.upsert_location("loc", Address::default()).await;
        let reconciler = TimeWindowReconciler::new(ctx.clone(), tree.clone(), api.clone());
        Harness {
            tree,
            api,
            ctx,
            reconciler,
        }
    }

    async fn value(tree: &MemoryStateTree, id: &str) -> Option<Value> {
        tree.get_state(id).await.unwrap().map(|s| s.val)
    }

    #[tokio::test]
    async fn test_index_follows_fetch_order() {
        let h = harness(&["a", "b"]).await;
        assert!(h.reconciler.refresh("loc").await);

        assert_eq!(
            value(&h.tree, "loc.timeWindows.indexedTimeWindows").await,
            Some(json!("a,b"))
        );
        assert_eq!(value(&h.tree, "loc.timeWindows.a.name").await, Some(json!("Window a")));
        assert_eq!(value(&h.tree, "loc.timeWindows.b.icalRaw").await, Some(json!("BEGIN:VCALENDAR")));
        assert_eq!(value(&h.tree, "loc.timeWindows.b.icalObj").await, Some(json!(r#"{"summary":"b"}"#)));
        assert!(h.tree.is_subscribed("loc.timeWindows.a.deleteTimeWindow").await);
        assert!(h.tree.is_subscribed("loc.timeWindows.createTimeWindow").await);
        assert!(h.tree.is_subscribed("loc.timeWindows.deleteAllTimeWindows").await);

        let control = h
            .tree
            .get_object("loc.timeWindows.a.deleteTimeWindow")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(control.common_str("timeWindowId"), Some("a"));
        assert_eq!(control.common_str("role"), Some("button.delete"));
    }

    #[tokio::test]
    async fn test_fetch_twice_is_stable() {
        let h = harness(&["a", "b"]).await;
        h.reconciler.fetch_and_publish("loc").await;
        let first = h.tree.objects_under("loc.").await.unwrap();
        let index = value(&h.tree, "loc.timeWindows.indexedTimeWindows").await;

        h.reconciler.fetch_and_publish("loc").await;
        assert_eq!(h.tree.objects_under("loc.").await.unwrap(), first);
        assert_eq!(value(&h.tree, "loc.timeWindows.indexedTimeWindows").await, index);
        assert_eq!(value(&h.tree, "loc.timeWindows.a.enabled").await, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_refresh_purges_stale_windows() {
        let h = harness(&["a", "b"]).await;
        h.reconciler.refresh("loc").await;

        h.api.set_windows(&["b"]);
        h.reconciler.refresh("loc").await;

        assert!(h.tree.get_object("loc.timeWindows.a").await.unwrap().is_none());
        assert!(h.tree.get_object("loc.timeWindows.a.name").await.unwrap().is_none());
        assert_eq!(
            value(&h.tree, "loc.timeWindows.indexedTimeWindows").await,
            Some(json!("b"))
        );
        assert_eq!(h.ctx.time_window_ids("loc").await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_purged_tree() {
        let h = harness(&["a"]).await;
        h.reconciler.refresh("loc").await;

        *h.api.fail_fetch.lock().unwrap() = true;
        assert!(!h.reconciler.refresh("loc").await);
        assert!(h.tree.objects_under("loc.timeWindows.").await.unwrap().is_empty());
        assert!(h.ctx.time_window_ids("loc").await.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_missing_calendar_begin() {
        let h = harness(&[]).await;
        h.reconciler.refresh("loc").await;
        let control = "loc.timeWindows.createTimeWindow";
        let payload = json!({"name": "Guests", "ical": ICAL.replace("BEGIN:VCALENDAR", "")});

        h.reconciler
            .create(control, &Value::String(payload.to_string()))
            .await;

        assert!(h.api.created.lock().unwrap().is_empty());
        assert_eq!(h.api.fetch_calls(), 1);
        assert_eq!(value(&h.tree, control).await, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_create_refreshes_on_success() {
        let h = harness(&["a"]).await;
        h.reconciler.refresh("loc").await;
        let control = "loc.timeWindows.createTimeWindow";
        let payload = json!({"name": "guests", "ical": ICAL});

        h.reconciler
            .create(control, &Value::String(payload.to_string()))
            .await;

        assert_eq!(h.api.created.lock().unwrap().len(), 1);
        assert_eq!(
            value(&h.tree, "loc.timeWindows.indexedTimeWindows").await,
            Some(json!("a,new-guests"))
        );
        assert_eq!(value(&h.tree, control).await, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_create_failure_still_resets_control() {
        let h = harness(&["a"]).await;
        h.reconciler.refresh("loc").await;
        *h.api.fail_create.lock().unwrap() = true;
        let control = "loc.timeWindows.createTimeWindow";
        let payload = Value::String(json!({"name": "guests", "ical": ICAL}).to_string());
        h.tree
            .set_state(control, State::new(payload.clone(), false))
            .await
            .unwrap();

        h.reconciler.create(control, &payload).await;

        assert_eq!(h.api.created.lock().unwrap().len(), 1);
        assert_eq!(h.api.fetch_calls(), 1);
        assert_eq!(
            value(&h.tree, "loc.timeWindows.indexedTimeWindows").await,
            Some(json!("a"))
        );
        let reset = h.tree.get_state(control).await.unwrap().unwrap();
        assert_eq!(reset.val, Value::Null);
        assert!(reset.ack);
    }

    #[tokio::test]
    async fn test_delete_one() {
        let h = harness(&["a", "b"]).await;
        h.reconciler.refresh("loc").await;

        h.reconciler.delete_one("loc.timeWindows.a.deleteTimeWindow").await;

        assert_eq!(h.api.deleted(), vec!["a"]);
        assert!(h.tree.get_object("loc.timeWindows.a.id").await.unwrap().is_none());
        assert_eq!(
            value(&h.tree, "loc.timeWindows.indexedTimeWindows").await,
            Some(json!("b"))
        );
    }

    #[tokio::test]
    async fn test_delete_one_failure_keeps_nodes() {
        let h = harness(&["a"]).await;
        h.reconciler.refresh("loc").await;
        h.api.fail_deletes.lock().unwrap().insert("a".into());

        h.reconciler.delete_one("loc.timeWindows.a.deleteTimeWindow").await;

        assert!(h.tree.get_object("loc.timeWindows.a.id").await.unwrap().is_some());
        assert_eq!(h.api.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let h = harness(&["a", "b", "c"]).await;
        h.reconciler.refresh("loc").await;
        h.api.fail_deletes.lock().unwrap().insert("b".into());

        h.reconciler
            .delete_all("loc.timeWindows.deleteAllTimeWindows")
            .await;

        let mut deleted = h.api.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["a", "c"]);
        assert_eq!(h.api.fetch_calls(), 2);
        assert_eq!(
            value(&h.tree, "loc.timeWindows.indexedTimeWindows").await,
            Some(json!("b"))
        );
    }

    #[tokio::test]
    async fn test_delete_all_without_windows() {
        let h = harness(&[]).await;
        h.reconciler.refresh("loc").await;

        h.reconciler
            .delete_all("loc.timeWindows.deleteAllTimeWindows")
            .await;

        assert!(h.api.deleted().is_empty());
        assert_eq!(h.api.fetch_calls(), 2);
        assert_eq!(
            value(&h.tree, "loc.timeWindows.indexedTimeWindows").await,
            Some(json!(""))
        );
    }
}
