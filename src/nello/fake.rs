//! Scripted `LockApi` used by the unit tests

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::LockApi;
use crate::models::{ApiLocation, TimeWindow, TimeWindowRequest};

#[derive(Default)]
pub struct FakeLockApi {
    pub locations: Mutex<Vec<ApiLocation>>,
    pub windows: Mutex<Vec<TimeWindow>>,
    pub fail_fetch: Mutex<bool>,
    pub fail_create: Mutex<bool>,
    pub panic_open: Mutex<bool>,
    pub fail_deletes: Mutex<HashSet<String>>,
    pub fetch_calls: Mutex<usize>,
    pub created: Mutex<Vec<TimeWindowRequest>>,
    pub deleted: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
    pub attached: Mutex<Vec<String>>,
}

impl FakeLockApi {
    pub fn with_windows(ids: &[&str]) -> Self {
        let api = Self::default();
        api.set_windows(ids);
        api
    }

    pub fn set_windows(&self, ids: &[&str]) {
        *self.windows.lock().unwrap() = ids.iter().map(|id| window(id)).collect();
    }

    pub fn fetch_calls(&self) -> usize {
        *self.fetch_calls.lock().unwrap()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

pub fn window(id: &str) -> TimeWindow {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": format!("Window {}", id),
        "enabled": true,
        "state": 1,
        "image": null,
        "ical": {"_raw": "BEGIN:VCALENDAR", "summary": id},
    }))
    .unwrap()
}

#[async_trait]
impl LockApi for FakeLockApi {
    async fn get_locations(&self) -> Result<Vec<ApiLocation>, String> {
        Ok(self.locations.lock().unwrap().clone())
    }

    async fn get_time_windows(&self, _location_id: &str) -> Result<Vec<TimeWindow>, String> {
        *self.fetch_calls.lock().unwrap() += 1;
        if *self.fail_fetch.lock().unwrap() {
            return Err("Service unavailable".to_string());
        }
        Ok(self.windows.lock().unwrap().clone())
    }

    async fn create_time_window(
        &self,
        _location_id: &str,
        request: &TimeWindowRequest,
    ) -> Result<String, String> {
        self.created.lock().unwrap().push(request.clone());
        if *self.fail_create.lock().unwrap() {
            return Err("Invalid time window (status 400)".to_string());
        }
        let id = format!("new-{}", request.name);
        self.windows.lock().unwrap().push(window(&id));
        Ok(id)
    }

    async fn delete_time_window(
        &self,
        _location_id: &str,
        time_window_id: &str,
    ) -> Result<(), String> {
        if self.fail_deletes.lock().unwrap().contains(time_window_id) {
            return Err(format!("Cannot delete {}", time_window_id));
        }
        self.deleted.lock().unwrap().push(time_window_id.to_string());
        self.windows
            .lock()
            .unwrap()
            .retain(|w| w.id != time_window_id);
        Ok(())
    }

    async fn open_door(&self, location_id: &str) -> Result<(), String> {
        if *self.panic_open.lock().unwrap() {
            panic!("open_door of {} blew up", location_id);
        }
        self.opened.lock().unwrap().push(location_id.to_string());
        Ok(())
    }

    async fn attach_webhook(&self, _location_id: &str, url: &str) -> Result<String, String> {
        self.attached.lock().unwrap().push(url.to_string());
        Ok(url.to_string())
    }
}
