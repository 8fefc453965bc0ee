//! Container-class definitions and the resolver the persister uses to
//! validate restored actions.
//!
//! The persister never looks classes up itself; callers inject a
//! [`ContainerClassResolver`]. [`ContainerClassRegistry`] is a concurrent
//! in-process implementation backed by [`DashMap`].
//!
//! ```rust
//! # use hobson_store::{ContainerClass, ContainerClassRef, ContainerClassRegistry, ContainerClassResolver};
//! let registry = ContainerClassRegistry::new();
//! registry.register(ContainerClass::new(ContainerClassRef::new("plugin1", "cc1"), "Turn on"));
//!
//! let class = registry.resolve(&ContainerClassRef::new("plugin1", "cc1")).unwrap();
//! assert_eq!(class.name, "Turn on");
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::model::ContainerClassRef;
use crate::value::Value;

/// One property a container class accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub id: String,
    pub name: String,
    /// A restored action without a non-null value for this property is invalid.
    pub required: bool,
}

impl PropertyDefinition {
    pub fn optional(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            required: false,
        }
    }

    pub fn required(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::optional(id, name)
        }
    }
}

/// A live container-class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerClass {
    pub reference: ContainerClassRef,
    pub name: String,
    pub properties: Vec<PropertyDefinition>,
}

impl ContainerClass {
    pub fn new(reference: ContainerClassRef, name: impl Into<String>) -> Self {
        Self {
            reference,
            name: name.into(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    /// Check `values` against this class's required properties.
    pub fn validate(&self, values: &BTreeMap<String, Value>) -> StoreResult<()> {
        for property in self.properties.iter().filter(|p| p.required) {
            match values.get(&property.id) {
                Some(v) if !v.is_null() => {}
                _ => {
                    return Err(StoreError::Validation(format!(
                        "{} is missing required property `{}`",
                        self.reference, property.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Maps a class reference to its live definition.
pub trait ContainerClassResolver: Send + Sync {
    /// `None` if no such class is currently known.
    fn resolve(&self, reference: &ContainerClassRef) -> Option<ContainerClass>;
}

impl<F> ContainerClassResolver for F
where
    F: Fn(&ContainerClassRef) -> Option<ContainerClass> + Send + Sync,
{
    fn resolve(&self, reference: &ContainerClassRef) -> Option<ContainerClass> {
        self(reference)
    }
}

/// Concurrent class registry.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone, Default)]
pub struct ContainerClassRegistry {
    inner: Arc<DashMap<ContainerClassRef, ContainerClass>>,
}

impl ContainerClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a class.
    pub fn register(&self, class: ContainerClass) {
        tracing::debug!(class = %class.reference, "container class registered");
        self.inner.insert(class.reference.clone(), class);
    }

    /// Remove a class, returning it if it was present.
    pub fn unregister(&self, reference: &ContainerClassRef) -> Option<ContainerClass> {
        self.inner.remove(reference).map(|(_, class)| class)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl ContainerClassResolver for ContainerClassRegistry {
    fn resolve(&self, reference: &ContainerClassRef) -> Option<ContainerClass> {
        self.inner.get(reference).map(|entry| entry.value().clone())
    }
}

// ── tests ────────────────────────────────────────────────────────────
