//! Local plugin configuration, persisted as one map per plugin.
//!
//! The configuration is surfaced as an [`ActionContainer`] whose class is
//! the plugin's configuration class, so callers edit it with the same
//! property machinery as any action.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::context::CollectionContext;
use crate::error::StoreResult;
use crate::model::{ActionContainer, ContainerClassRef, PluginContext};
use crate::persister::CollectionPersister;
use crate::resolver::ContainerClass;
use crate::value::Value;

/// Read and write plugin configuration values.
#[derive(Debug, Clone)]
pub struct PluginConfigStore {
    ctx: Arc<CollectionContext>,
    persister: CollectionPersister,
}

impl PluginConfigStore {
    /// Open the store file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::new(Arc::new(CollectionContext::open(path)?)))
    }

    /// Build a store over an already open context, typically one shared
    /// with an [`ActionSetStore`](crate::ActionSetStore).
    pub fn new(ctx: Arc<CollectionContext>) -> Self {
        Self {
            ctx,
            persister: CollectionPersister::new(),
        }
    }

    /// The stored configuration of `plugin`. Empty if never configured.
    pub fn get_local_plugin_configuration(
        &self,
        plugin: &PluginContext,
        class: &ContainerClass,
    ) -> StoreResult<ActionContainer> {
        let values = self.persister.restore_plugin_configuration(&self.ctx, plugin)?;
        Ok(ActionContainer {
            container_class: configuration_class(plugin, class),
            values,
        })
    }

    /// Replace the whole configuration of `plugin` with `values`.
    ///
    /// Required properties of `class` are checked before anything is written.
    #[instrument(skip(self, class, values), fields(plugin = %plugin, values = values.len()))]
    pub fn set_local_plugin_configuration(
        &self,
        plugin: &PluginContext,
        class: &ContainerClass,
        values: &BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        class.validate(values)?;
        self.ctx.atomically(|ctx| {
            self.persister.delete_plugin_configuration(ctx, plugin)?;
            self.persister
                .save_plugin_configuration(ctx, plugin, values.iter().map(|(k, v)| (k.as_str(), v)))
        })?;

        info!("plugin configuration replaced");
        Ok(())
    }

    /// Set one property, leaving the others as they are.
    #[instrument(skip(self, class, value), fields(plugin = %plugin))]
    pub fn set_local_plugin_configuration_property(
        &self,
        plugin: &PluginContext,
        class: &ContainerClass,
        name: &str,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        let value = value.into();
        self.ctx.atomically(|ctx| {
            let mut merged = self.persister.restore_plugin_configuration(ctx, plugin)?;
            merged.insert(name.to_string(), value.clone());
            class.validate(&merged)?;
            self.persister
                .save_plugin_configuration(ctx, plugin, [(name, &value)])
        })
    }

    /// Forget the configuration of `plugin`. Returns whether any existed.
    #[instrument(skip(self), fields(plugin = %plugin))]
    pub fn delete_local_plugin_configuration(&self, plugin: &PluginContext) -> StoreResult<bool> {
        let removed = self
            .ctx
            .atomically(|ctx| self.persister.delete_plugin_configuration(ctx, plugin))?;
        if removed {
            info!("plugin configuration deleted");
        }
        Ok(removed)
    }

    /// Close the underlying context.
    pub fn close(&self) -> StoreResult<()> {
        self.ctx.close()
    }
}

fn configuration_class(plugin: &PluginContext, class: &ContainerClass) -> ContainerClassRef {
    ContainerClassRef::new(
        plugin.plugin_id.clone(),
        class.reference.container_class_id.clone(),
    )
}

// ── tests ────────────────────────────────────────────────────────────
