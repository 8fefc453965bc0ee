//! Hub-wide configuration, persisted as one map per hub.
//!
//! Unlike plugin and device configuration there is no class to validate
//! against; values are free-form and setting them merges.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::context::CollectionContext;
use crate::error::StoreResult;
use crate::model::HubContext;
use crate::persister::CollectionPersister;
use crate::value::Value;

/// Read and write hub configuration values.
#[derive(Debug, Clone)]
pub struct HubConfigStore {
    ctx: Arc<CollectionContext>,
    persister: CollectionPersister,
}

impl HubConfigStore {
    /// Open the store file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::new(Arc::new(CollectionContext::open(path)?)))
    }

    pub fn new(ctx: Arc<CollectionContext>) -> Self {
        Self {
            ctx,
            persister: CollectionPersister::new(),
        }
    }

    /// All stored values for `hub`, sorted by name. Empty if never configured.
    pub fn get_hub_configuration(&self, hub: &HubContext) -> StoreResult<BTreeMap<String, Value>> {
        self.persister.restore_hub_configuration(&self.ctx, hub)
    }

    pub fn get_hub_configuration_property(
        &self,
        hub: &HubContext,
        name: &str,
    ) -> StoreResult<Option<Value>> {
        Ok(self.get_hub_configuration(hub)?.remove(name))
    }

    /// Merge `values` into the configuration of `hub`. Names not in
    /// `values` keep their stored value.
    #[instrument(skip(self, values), fields(hub = %hub, values = values.len()))]
    pub fn set_hub_configuration(
        &self,
        hub: &HubContext,
        values: &BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        self.ctx.atomically(|ctx| {
            self.persister
                .save_hub_configuration(ctx, hub, values.iter().map(|(k, v)| (k.as_str(), v)))
        })?;

        info!("hub configuration updated");
        Ok(())
    }

    /// Forget the configuration of `hub`. Returns whether any existed.
    #[instrument(skip(self), fields(hub = %hub))]
    pub fn delete_hub_configuration(&self, hub: &HubContext) -> StoreResult<bool> {
        let removed = self
            .ctx
            .atomically(|ctx| self.persister.delete_hub_configuration(ctx, hub))?;
        if removed {
            info!("hub configuration deleted");
        }
        Ok(removed)
    }

    /// Close the underlying context.
    pub fn close(&self) -> StoreResult<()> {
        self.ctx.close()
    }
}

// ── tests ────────────────────────────────────────────────────────────
