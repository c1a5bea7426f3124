//! Synchronization between nello and the state tree
//!
//! - `locations`: start-up location sync, webhook attachment, periodic refresh
//! - `timewindows`: purge / fetch / publish cycle and time-window commands
//! - `events`: bounded webhook event feed
//!
//! All of them share one [`AdapterContext`] holding the known locations.

pub mod events;
pub mod locations;
pub mod timewindows;

pub use events::EventFeed;
pub use locations::LocationSyncer;
pub use timewindows::TimeWindowReconciler;

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::{Address, TimeWindow};

#[derive(Debug, Clone, Default)]
pub struct LocationRecord {
    pub address: Address,
    /// Time windows in the order of the last fetch
    pub time_windows: Vec<TimeWindow>,
}

/// In-memory view of the locations owned by this bridge instance
#[derive(Default)]
pub struct AdapterContext {
    locations: RwLock<HashMap<String, LocationRecord>>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_location(&self, location_id: &str, address: Address) {
        let mut locations = self.locations.write().await;
        locations.insert(
            location_id.to_string(),
            LocationRecord {
                address,
                time_windows: Vec::new(),
            },
        );
    }

    /// Full address for log lines, falling back to the id
    pub async fn address_label(&self, location_id: &str) -> String {
        self.locations
            .read()
            .await
            .get(location_id)
            .map(|record| record.address.address.clone())
            .filter(|address| !address.is_empty())
            .unwrap_or_else(|| location_id.to_string())
    }

    pub async fn replace_time_windows(&self, location_id: &str, windows: Vec<TimeWindow>) {
        let mut locations = self.locations.write().await;
        locations.entry(location_id.to_string()).or_default().time_windows = windows;
    }

    pub async fn clear_time_windows(&self, location_id: &str) {
        if let Some(record) = self.locations.write().await.get_mut(location_id) {
            record.time_windows.clear();
        }
    }

    pub async fn remove_time_window(&self, location_id: &str, time_window_id: &str) {
        if let Some(record) = self.locations.write().await.get_mut(location_id) {
            record.time_windows.retain(|w| w.id != time_window_id);
        }
    }

    pub async fn time_window_ids(&self, location_id: &str) -> Vec<String> {
        self.locations
            .read()
            .await
            .get(location_id)
            .map(|record| record.time_windows.iter().map(|w| w.id.clone()).collect())
            .unwrap_or_default()
    }
}
