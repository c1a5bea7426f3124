//! CommandDispatcher: route state-tree writes to the matching command
//!
//! Writes to control nodes arrive as [`StateChange`] notifications. They are
//! handled one at a time, in arrival order.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::nello::LockApi;
use crate::state::{StateChange, StateTree};
use crate::sync::locations::OPEN_DOOR_NODE;
use crate::sync::timewindows::{CREATE_NODE, DELETE_ALL_NODE, DELETE_NODE};
use crate::sync::{EventFeed, TimeWindowReconciler};

/// What a state change asks the bridge to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Webhook payload relayed through the iot state
    Event,
    OpenDoor,
    CreateTimeWindow,
    DeleteTimeWindow,
    DeleteAllTimeWindows,
}

impl Command {
    pub fn from_state_id(id: &str, iot_state: &str) -> Option<Self> {
        let last = id.rsplit('.').next().unwrap_or(id);

        if id == iot_state {
            Some(Command::Event)
        } else if last == OPEN_DOOR_NODE {
            Some(Command::OpenDoor)
        } else if last == CREATE_NODE && id.contains(".timeWindows.") {
            Some(Command::CreateTimeWindow)
        } else if last == DELETE_NODE {
            Some(Command::DeleteTimeWindow)
        } else if last == DELETE_ALL_NODE {
            Some(Command::DeleteAllTimeWindows)
        } else {
            None
        }
    }
}

pub struct CommandDispatcher {
    tree: Arc<dyn StateTree>,
    api: Arc<dyn LockApi>,
    reconciler: Arc<TimeWindowReconciler>,
    feed: Arc<EventFeed>,
    iot_state: String,
}

impl CommandDispatcher {
    pub fn new(
        tree: Arc<dyn StateTree>,
        api: Arc<dyn LockApi>,
        reconciler: Arc<TimeWindowReconciler>,
        feed: Arc<EventFeed>,
        iot_state: String,
    ) -> Self {
        Self {
            tree,
            api,
            reconciler,
            feed,
            iot_state,
        }
    }

    /// Consume change notifications until the tree goes away
    ///
    /// Each change runs in its own task so a panicking handler only loses that
    /// change; the next one is still handled in order.
    pub async fn run(self: Arc<Self>, mut changes: broadcast::Receiver<StateChange>) {
        tracing::info!("[Dispatch] Listening for state changes");

        loop {
            match changes.recv().await {
                Ok(change) => {
                    let id = change.id.clone();
                    let dispatcher = self.clone();
                    let step = tokio::spawn(async move { dispatcher.handle(change).await });
                    if let Err(e) = step.await {
                        tracing::error!("[Dispatch] Handling change of {} failed: {}", id, e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[Dispatch] Dropped {} state changes", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }

        tracing::info!("[Dispatch] State change stream closed");
    }

    pub async fn handle(&self, change: StateChange) {
        tracing::debug!(
            "[Dispatch] State of {} has changed {:?}.",
            change.id,
            change.state
        );

        // Deleted states behave like an acknowledged null write
        let Some(state) = change.state else {
            return;
        };
        let Some(command) = Command::from_state_id(&change.id, &self.iot_state) else {
            return;
        };

        match command {
            Command::Event => self.relay_event(&state.val).await,
            // Our own acknowledged writes land here too
            _ if state.ack => {}
            Command::OpenDoor => self.open_door(&change.id).await,
            Command::CreateTimeWindow => {
                if !state.val.is_null() {
                    self.reconciler.create(&change.id, &state.val).await;
                }
            }
            Command::DeleteTimeWindow => self.reconciler.delete_one(&change.id).await,
            Command::DeleteAllTimeWindows => self.reconciler.delete_all(&change.id).await,
        }
    }

    async fn relay_event(&self, val: &Value) {
        let payload = match val {
            Value::String(text) if !text.is_empty() => match serde_json::from_str::<Value>(text) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("[Dispatch] Unreadable event in {}: {}", self.iot_state, e);
                    return;
                }
            },
            Value::Object(_) => val.clone(),
            _ => return,
        };

        self.feed.on_webhook(&payload).await;
    }

    async fn open_door(&self, control_id: &str) {
        let location_id = match self.tree.get_object(control_id).await {
            Ok(Some(object)) => object.common_str("locationId").map(String::from),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("[Dispatch] Lookup of {} failed: {}", control_id, e);
                return;
            }
        };
        let Some(location_id) = location_id else {
            tracing::warn!("[Dispatch] {} carries no location", control_id);
            return;
        };

        tracing::info!(
            "[Dispatch] Triggered to open door of location {}.",
            location_id
        );
        match self.api.open_door(&location_id).await {
            Ok(()) => tracing::info!("[Dispatch] Door of location {} opened.", location_id),
            Err(e) => tracing::error!(
                "[Dispatch] Opening door of location {} failed: {}",
                location_id,
                e
            ),
        }
    }
}
