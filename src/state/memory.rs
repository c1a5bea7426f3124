//! In-memory state tree
//!
//! Objects and states live in hash maps guarded by a tokio `RwLock`. Writes to
//! subscribed ids are fanned out on a broadcast channel.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::{State, StateChange, StateObject, StateTree};

const CHANGE_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inner {
    objects: HashMap<String, StateObject>,
    states: HashMap<String, State>,
    subscriptions: HashSet<String>,
}

pub struct MemoryStateTree {
    inner: RwLock<Inner>,
    changes: broadcast::Sender<StateChange>,
}

impl MemoryStateTree {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            changes,
        }
    }

    #[cfg(test)]
    pub async fn is_subscribed(&self, id: &str) -> bool {
        self.inner.read().await.subscriptions.contains(id)
    }

    fn notify(&self, id: &str, state: Option<State>) {
        // No receivers is fine: nobody is listening yet
        let _ = self.changes.send(StateChange {
            id: id.to_string(),
            state,
        });
    }
}

impl Default for MemoryStateTree {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateTree for MemoryStateTree {
    async fn get_object(&self, id: &str) -> Result<Option<StateObject>, String> {
        Ok(self.inner.read().await.objects.get(id).cloned())
    }

    async fn set_object(&self, object: StateObject) -> Result<(), String> {
        if object.id.is_empty() {
            return Err("Object id must not be empty".to_string());
        }
        let mut inner = self.inner.write().await;
        inner.objects.insert(object.id.clone(), object);
        Ok(())
    }

    async fn del_object(&self, id: &str) -> Result<(), String> {
        let notify = {
            let mut inner = self.inner.write().await;
            inner.objects.remove(id);
            let had_state = inner.states.remove(id).is_some();
            let was_subscribed = inner.subscriptions.remove(id);
            had_state && was_subscribed
        };

        if notify {
            self.notify(id, None);
        }
        Ok(())
    }

    async fn get_state(&self, id: &str) -> Result<Option<State>, String> {
        Ok(self.inner.read().await.states.get(id).cloned())
    }

    async fn set_state(&self, id: &str, state: State) -> Result<(), String> {
        let subscribed = {
            let mut inner = self.inner.write().await;
            if !inner.objects.contains_key(id) {
                return Err(format!("No object for state {}", id));
            }
            inner.states.insert(id.to_string(), state.clone());
            inner.subscriptions.contains(id)
        };

        if subscribed {
            self.notify(id, Some(state));
        }
        Ok(())
    }

    async fn objects_under(&self, prefix: &str) -> Result<Vec<String>, String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner
            .objects
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn subscribe(&self, id: &str) {
        self.inner
            .write()
            .await
            .subscriptions
            .insert(id.to_string());
    }

    fn changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}
