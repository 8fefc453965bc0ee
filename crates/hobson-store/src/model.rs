//! Domain entities persisted by this crate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

// ═══════════════════════════════════════════════════════════════════════
//  Scopes
// ═══════════════════════════════════════════════════════════════════════

/// Opaque namespace identifying which hub an entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubContext(String);

impl HubContext {
    /// Id of the hub running in this process.
    pub const LOCAL: &'static str = "local";

    pub fn new(hub_id: impl Into<String>) -> Self {
        Self(hub_id.into())
    }

    pub fn local() -> Self {
        Self::new(Self::LOCAL)
    }

    pub fn hub_id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HubContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A plugin within a hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginContext {
    pub hub: HubContext,
    pub plugin_id: String,
}

impl PluginContext {
    pub fn new(hub: HubContext, plugin_id: impl Into<String>) -> Self {
        Self {
            hub,
            plugin_id: plugin_id.into(),
        }
    }

    /// A plugin of the local hub.
    pub fn local(plugin_id: impl Into<String>) -> Self {
        Self::new(HubContext::local(), plugin_id)
    }
}

impl fmt::Display for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hub, self.plugin_id)
    }
}

/// A device published by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceContext {
    pub plugin: PluginContext,
    pub device_id: String,
}

impl DeviceContext {
    pub fn new(plugin: PluginContext, device_id: impl Into<String>) -> Self {
        Self {
            plugin,
            device_id: device_id.into(),
        }
    }

    /// A device of a plugin on the local hub.
    pub fn local(plugin_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self::new(PluginContext::local(plugin_id), device_id)
    }

    pub fn hub(&self) -> &HubContext {
        &self.plugin.hub
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.device_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Actions
// ═══════════════════════════════════════════════════════════════════════

/// Identifies the kind of an action or configuration schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerClassRef {
    pub plugin_id: String,
    pub container_class_id: String,
}

impl ContainerClassRef {
    pub fn new(plugin_id: impl Into<String>, container_class_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            container_class_id: container_class_id.into(),
        }
    }
}

impl fmt::Display for ContainerClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin_id, self.container_class_id)
    }
}

/// One configured action: what kind it is plus its property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContainer {
    pub container_class: ContainerClassRef,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl ActionContainer {
    pub fn new(container_class: ContainerClassRef) -> Self {
        Self {
            container_class,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn property_value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn has_property_values(&self) -> bool {
        !self.values.is_empty()
    }
}

/// An ordered, persisted list of actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSet {
    id: String,
    pub name: Option<String>,
    pub actions: Vec<ActionContainer>,
}

impl ActionSet {
    /// Create a set with a freshly generated id (UUID v7).
    pub fn new(name: Option<String>, actions: Vec<ActionContainer>) -> Self {
        Self::with_id(Uuid::now_v7().to_string(), name, actions)
    }

    /// Rebuild a set with a known id.
    pub fn with_id(id: impl Into<String>, name: Option<String>, actions: Vec<ActionContainer>) -> Self {
        Self {
            id: id.into(),
            name,
            actions,
        }
    }

    /// The id assigned at creation. Never changes.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ── tests ────────────────────────────────────────────────────────────
