//! State tree integration
//!
//! - `StateTree`: object/state persistence and change notification primitives
//!   of the host runtime
//! - `memory`: in-process implementation backed by hash maps
//! - `mirror`: "create object on first write" helper used by every publisher

pub mod memory;
pub mod mirror;

pub use memory::MemoryStateTree;
pub use mirror::{NodeSpec, StateMirror};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Value of a state plus acknowledgement flag and write time (epoch ms)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub val: Value,
    pub ack: bool,
    pub ts: i64,
}

impl State {
    pub fn new(val: Value, ack: bool) -> Self {
        Self {
            val,
            ack,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Object backing a state; `common` carries name/role/type and custom attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub common: Map<String, Value>,
    pub native: Map<String, Value>,
}

impl StateObject {
    pub fn common_str(&self, key: &str) -> Option<&str> {
        self.common.get(key).and_then(Value::as_str)
    }
}

/// Change notification delivered for subscribed states
#[derive(Debug, Clone)]
pub struct StateChange {
    pub id: String,
    /// `None` when the state was deleted
    pub state: Option<State>,
}

#[async_trait]
pub trait StateTree: Send + Sync {
    async fn get_object(&self, id: &str) -> Result<Option<StateObject>, String>;

    async fn set_object(&self, object: StateObject) -> Result<(), String>;

    /// Delete an object together with its state
    async fn del_object(&self, id: &str) -> Result<(), String>;

    async fn get_state(&self, id: &str) -> Result<Option<State>, String>;

    async fn set_state(&self, id: &str, state: State) -> Result<(), String>;

    /// Ids of all objects whose id starts with `prefix`, sorted
    async fn objects_under(&self, prefix: &str) -> Result<Vec<String>, String>;

    /// Deliver future writes to `id` through [`StateTree::changes`]
    async fn subscribe(&self, id: &str);

    fn changes(&self) -> broadcast::Receiver<StateChange>;
}
