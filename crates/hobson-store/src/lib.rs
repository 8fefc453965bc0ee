//! # hobson-store
//!
//! Embedded persistence for the Hobson hub.
//!
//! Entities are flattened into named key/value maps and value sets held in
//! a single SQLite file. Mutations stay pending until committed, and the
//! file is owned by one process at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ActionSetStore     PluginConfigStore        │
//! │  HubConfigStore     DeviceConfigStore        │
//! ├──────────────────────────────────────────────┤
//! │  CollectionPersister (entity ⇄ collections)  │
//! │  ContainerClassResolver (injected)           │
//! ├──────────────────────────────────────────────┤
//! │  CollectionContext (named maps / sets)       │
//! │  Migrations (versioned, transactional)       │
//! │  rusqlite, WAL, exclusive lock               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hobson_store::{ActionContainer, ActionSetStore, ContainerClassRef,
//!     ContainerClassRegistry, HubContext};
//!
//! let registry = ContainerClassRegistry::new();
//! let store = ActionSetStore::open("data/hobson.db", Arc::new(registry))?;
//! let set = store.add_action_set(
//!     &HubContext::local(),
//!     Some("evening"),
//!     vec![ActionContainer::new(ContainerClassRef::new("plugin1", "cc1"))
//!         .with_value("foo", "bar")],
//! )?;
//! ```

pub mod action_store;
pub mod config;
pub mod context;
pub mod device_config_store;
pub mod error;
pub mod hub_config_store;
pub mod keys;
pub mod migration;
pub mod model;
pub mod persister;
pub mod plugin_config_store;
pub mod resolver;
pub mod value;

// ── re-exports ───────────────────────────────────────────────────────

pub use action_store::{ActionSetStore, ActionSets};
pub use config::{StoreConfig, SyncMode};
pub use context::{CollectionContext, CollectionMap, CollectionSet};
pub use device_config_store::DeviceConfigStore;
pub use error::{StoreError, StoreResult};
pub use hub_config_store::HubConfigStore;
pub use model::{
    ActionContainer, ActionSet, ContainerClassRef, DeviceContext, HubContext, PluginContext,
};
pub use persister::CollectionPersister;
pub use plugin_config_store::PluginConfigStore;
pub use resolver::{ContainerClass, ContainerClassRegistry, ContainerClassResolver, PropertyDefinition};
pub use value::Value;
