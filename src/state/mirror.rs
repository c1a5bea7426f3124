//! StateMirror: set a value and create its backing object when missing

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{State, StateObject, StateTree};

/// Role and description for nodes whose metadata is fixed
const WELL_KNOWN: &[(&str, &str, &str)] = &[
    ("address.address", "text", "Full address of the location"),
    ("address.city", "text", "City of the location"),
    ("address.country", "text", "Country of the location"),
    ("address.state", "text", "State of the location"),
    ("address.street", "text", "Street with number of the location"),
    ("address.streetName", "text", "Street name of the location"),
    ("address.streetNumber", "text", "Street number of the location"),
    ("address.zip", "text", "ZIP code of the location"),
    ("timeWindows.enabled", "indicator", "State whether time window is enabled"),
    ("timeWindows.icalObj", "json", "Object of the calendar data"),
    ("timeWindows.icalRaw", "text", "Text of the calendar data in iCal format"),
    ("timeWindows.id", "id", "ID of the time window"),
    ("timeWindows.image", "disabled", "(not in used)"),
    ("timeWindows.name", "text", "Name of the time window"),
    ("timeWindows.state", "indicator", "State"),
];

/// Path plus the metadata used when the node has to be created
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSpec {
    pub node: String,
    pub description: Option<String>,
    pub role: Option<String>,
    pub common: Map<String, Value>,
    pub native: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ..Default::default()
        }
    }

    /// Node with the fixed metadata registered for `key` (e.g. `address.city`)
    pub fn known(node: impl Into<String>, key: &str) -> Self {
        let spec = Self::new(node);
        match WELL_KNOWN.iter().find(|(k, _, _)| *k == key) {
            Some((_, role, description)) => spec.role(*role).description(*description),
            None => spec,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Custom `common` attribute, e.g. `locationId` on control nodes
    pub fn common(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.common.insert(key.to_string(), value.into());
        self
    }

    /// Writable control node (`write: true`)
    pub fn writable(self) -> Self {
        self.common("write", true)
    }

    /// Object created for this node: defaults, then caller `common`, then
    /// name and role
    pub fn to_object(&self) -> StateObject {
        let mut common = Map::new();
        common.insert("role".into(), Value::String("state".into()));
        common.insert("type".into(), Value::String("string".into()));
        common.extend(self.common.clone());

        if let Some(ref description) = self.description {
            common.insert("name".into(), Value::String(description.clone()));
        }
        if let Some(ref role) = self.role {
            common.insert("role".into(), Value::String(role.clone()));
        }

        StateObject {
            id: self.node.clone(),
            object_type: "state".to_string(),
            common,
            native: self.native.clone(),
        }
    }
}

/// Writes values into the state tree, creating objects on first write
#[derive(Clone)]
pub struct StateMirror {
    tree: Arc<dyn StateTree>,
}

impl StateMirror {
    pub fn new(tree: Arc<dyn StateTree>) -> Self {
        Self { tree }
    }

    /// Ensure the object exists and write `value` acknowledged
    pub async fn set(&self, spec: &NodeSpec, value: impl Into<Value>) {
        self.ensure(spec).await;

        let state = State::new(value.into(), true);
        if let Err(e) = self.tree.set_state(&spec.node, state).await {
            tracing::error!("[Mirror] Failed to set {}: {}", spec.node, e);
        }
    }

    /// Ensure the object exists without touching its value
    pub async fn ensure(&self, spec: &NodeSpec) {
        let exists = match self.tree.get_object(&spec.node).await {
            Ok(object) => object.is_some(),
            Err(e) => {
                // Lookup errors are treated like a missing object
                tracing::error!("[Mirror] Lookup of {} failed: {}", spec.node, e);
                false
            }
        };

        if !exists {
            tracing::debug!("[Mirror] Creating node {}", spec.node);
            if let Err(e) = self.tree.set_object(spec.to_object()).await {
                tracing::error!("[Mirror] Failed to create {}: {}", spec.node, e);
            }
        }
    }
}
