//! LocationSyncer: start-up sync of all nello locations
//!
//! Mirrors the address data of every location, runs the first time-window
//! refresh, schedules the periodic refresh and attaches the webhook listener.
//! Background tasks are kept so they can be stopped on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::codec;
use crate::config::{AdapterConfig, WebhookMode};
use crate::models::{Address, ApiLocation};
use crate::nello::client::listener_port;
use crate::nello::LockApi;
use crate::state::{NodeSpec, StateMirror, StateTree};
use crate::sync::{AdapterContext, EventFeed, TimeWindowReconciler};

pub const OPEN_DOOR_NODE: &str = "_openDoor";

pub struct LocationSyncer {
    ctx: Arc<AdapterContext>,
    tree: Arc<dyn StateTree>,
    mirror: StateMirror,
    api: Arc<dyn LockApi>,
    reconciler: Arc<TimeWindowReconciler>,
    feed: Arc<EventFeed>,
    config: AdapterConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    listener_started: AtomicBool,
}

impl LocationSyncer {
    pub fn new(
        ctx: Arc<AdapterContext>,
        tree: Arc<dyn StateTree>,
        api: Arc<dyn LockApi>,
        reconciler: Arc<TimeWindowReconciler>,
        feed: Arc<EventFeed>,
        config: AdapterConfig,
    ) -> Self {
        Self {
            ctx,
            mirror: StateMirror::new(tree.clone()),
            tree,
            api,
            reconciler,
            feed,
            config,
            tasks: Mutex::new(Vec::new()),
            listener_started: AtomicBool::new(false),
        }
    }

    /// Fetch all locations and set each of them up; returns how many were synced
    pub async fn start(self: Arc<Self>) -> usize {
        let locations = match self.api.get_locations().await {
            Ok(locations) => locations,
            Err(e) => {
                tracing::error!("[Locations] Fetching locations failed: {}", e);
                return 0;
            }
        };

        let count = locations.len();
        for location in locations {
            self.sync_location(location).await;
        }

        tracing::info!("[Locations] Retrieved {} locations", count);
        count
    }

    async fn sync_location(&self, location: ApiLocation) {
        let location_id = location.location_id.clone();
        let address = Address::from(location.address);
        tracing::info!(
            "[Locations] Updating location {} ({})",
            address.address,
            location_id
        );

        self.ctx.upsert_location(&location_id, address.clone()).await;

        for (key, value) in address.fields() {
            let spec = NodeSpec::known(
                format!("{}.address.{}", location_id, key),
                &format!("address.{}", key),
            );
            self.mirror.set(&spec, value).await;
        }

        self.reconciler.refresh(&location_id).await;
        self.schedule_refresh(&location_id).await;
        self.attach_webhook(&location_id).await;

        let street = &address.street_name;
        self.mirror
            .set(
                &NodeSpec::new(format!("{}.id", location_id))
                    .description(format!("ID of location {}", street))
                    .role("id"),
                location_id.as_str(),
            )
            .await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        self.mirror
            .set(
                &NodeSpec::new(format!("{}.refreshedTimestamp", location_id))
                    .description(format!("Last update (Timestamp) of location {}", street))
                    .role("value"),
                now_ms / 1000,
            )
            .await;
        self.mirror
            .set(
                &NodeSpec::new(format!("{}.refreshedDateTime", location_id))
                    .description(format!("Last update (DateTime) of location {}", street))
                    .role("text"),
                codec::format_date_time(now_ms),
            )
            .await;

        let open_door_id = format!("{}.{}", location_id, OPEN_DOOR_NODE);
        self.mirror
            .set(
                &NodeSpec::new(&open_door_id)
                    .description(format!("Open door of location {}", street))
                    .common("locationId", location_id.as_str())
                    .common("role", "button.open.door")
                    .common("type", "boolean")
                    .writable(),
                false,
            )
            .await;
        self.tree.subscribe(&open_door_id).await;
    }

    async fn schedule_refresh(&self, location_id: &str) {
        let Some(period) = self.config.refresh_interval() else {
            return;
        };

        let reconciler = self.reconciler.clone();
        let location_id = location_id.to_string();
        tracing::info!(
            "[Locations] Refreshing time windows of {} every {}s",
            location_id,
            period.as_secs()
        );

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the initial refresh already ran
            ticker.tick().await;

            loop {
                ticker.tick().await;
                reconciler.refresh(&location_id).await;
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn attach_webhook(&self, location_id: &str) {
        let url = match self.config.webhook_mode() {
            WebhookMode::Disabled => {
                tracing::warn!(
                    "[Locations] Can not attach event listener! Please specify cloud URL or external DynDNS URL in the configuration!"
                );
                return;
            }
            WebhookMode::Cloud(url) | WebhookMode::DynDns(url) => url,
        };

        let attached = match self.api.attach_webhook(location_id, &url).await {
            Ok(attached) => attached,
            Err(e) => {
                tracing::warn!(
                    "[Locations] Failed to attach listener for webhooks (used url {}): {}",
                    url,
                    e
                );
                return;
            }
        };
        tracing::info!("[Locations] Listener attached to url {}.", attached);

        match self.config.webhook_mode() {
            WebhookMode::Cloud(_) => {
                self.mirror
                    .ensure(
                        &NodeSpec::new(&self.config.iot)
                            .description("Webhook events relayed by the cloud service")
                            .role("json")
                            .writable(),
                    )
                    .await;
                self.tree.subscribe(&self.config.iot).await;
                tracing::debug!("[Locations] Subscribed to state {}.", self.config.iot);
            }
            WebhookMode::DynDns(_) => self.start_listener(&attached).await,
            WebhookMode::Disabled => {}
        }
    }

    /// Bind the DynDNS webhook listener once, on the port of the attached URL
    async fn start_listener(&self, url: &str) {
        let Some(port) = listener_port(url) else {
            tracing::warn!("[Locations] No port in webhook url {}", url);
            return;
        };
        if self.listener_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let feed = self.feed.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = crate::api::serve_webhook(port, feed).await {
                tracing::error!("[Locations] Webhook listener on port {} failed: {}", port, e);
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Stop periodic refreshes and the webhook listener
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
        tracing::info!("[Locations] Background tasks stopped");
    }

    #[cfg(test)]
    async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}
