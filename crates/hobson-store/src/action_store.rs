//! Public repository for action sets.
//!
//! [`ActionSetStore`] is constructed once at startup and shared by
//! reference. Every write goes through [`CollectionContext::atomically`],
//! so it is either committed as a whole or not at all.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::context::CollectionContext;
use crate::error::{StoreError, StoreResult};
use crate::keys;
use crate::model::{ActionContainer, ActionSet, HubContext};
use crate::persister::CollectionPersister;
use crate::resolver::ContainerClassResolver;
use crate::value::Value;

/// Create, fetch, enumerate and delete action sets.
#[derive(Clone)]
pub struct ActionSetStore {
    ctx: Arc<CollectionContext>,
    persister: CollectionPersister,
    resolver: Arc<dyn ContainerClassResolver>,
}

impl ActionSetStore {
    /// Open the store file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        resolver: Arc<dyn ContainerClassResolver>,
    ) -> StoreResult<Self> {
        let ctx = CollectionContext::open(path)?;
        Ok(Self::new(Arc::new(ctx), resolver))
    }

    /// Build a store over an already open context.
    pub fn new(ctx: Arc<CollectionContext>, resolver: Arc<dyn ContainerClassResolver>) -> Self {
        Self {
            ctx,
            persister: CollectionPersister::new(),
            resolver,
        }
    }

    /// The underlying context.
    pub fn context(&self) -> &Arc<CollectionContext> {
        &self.ctx
    }

    /// Every action set of `hub`, restored one at a time as the iterator
    /// advances, in a stable order.
    ///
    /// Ids come from the stored metadata names, not the tracking set. Ids
    /// missing from the tracking set are re-added and ids with no metadata
    /// are dropped from it. The repair stays pending like any other
    /// mutation; enumeration never commits.
    #[instrument(skip(self))]
    pub fn get_all_action_sets(&self, hub: &HubContext) -> StoreResult<ActionSets<'_>> {
        let ids = self.ctx.serialized(|ctx| {
            let ids = self.persister.scan_action_set_ids(hub, ctx)?;
            let tracking = keys::action_sets(hub);
            let tracked: HashSet<String> = ctx
                .read_set(&tracking)?
                .unwrap_or_default()
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(id) => Some(id),
                    _ => None,
                })
                .collect();

            let mut added = 0;
            for id in ids.iter().filter(|id| !tracked.contains(*id)) {
                ctx.add_set_value(&tracking, Value::from(id.as_str()))?;
                added += 1;
            }
            let mut dropped = 0;
            for id in tracked.iter().filter(|id| !ids.contains(*id)) {
                ctx.remove_from_set(&tracking, &Value::from(id.as_str()))?;
                dropped += 1;
            }
            if added > 0 || dropped > 0 {
                info!(hub = %hub, added, dropped, "action set tracking repaired");
            }
            Ok(ids)
        })?;

        debug!(hub = %hub, count = ids.len(), "enumerating action sets");
        Ok(ActionSets {
            store: self,
            hub: hub.clone(),
            ids: ids.into_iter(),
        })
    }

    /// Fetch one action set.
    pub fn get_action_set(&self, hub: &HubContext, id: &str) -> StoreResult<ActionSet> {
        self.persister
            .restore_action_set(hub, &self.ctx, self.resolver.as_ref(), id)
    }

    /// Create and durably persist a new action set with a fresh id.
    #[instrument(skip(self, actions), fields(actions = actions.len()))]
    pub fn add_action_set(
        &self,
        hub: &HubContext,
        name: Option<&str>,
        actions: Vec<ActionContainer>,
    ) -> StoreResult<ActionSet> {
        let set = ActionSet::new(name.map(str::to_string), actions);
        self.ctx
            .atomically(|ctx| self.persister.save_action_set(hub, ctx, &set))?;

        info!(hub = %hub, action_set_id = %set.id(), "action set added");
        Ok(set)
    }

    /// Replace a stored action set with `set` in full.
    #[instrument(skip(self, set), fields(action_set_id = %set.id()))]
    pub fn save_action_set(&self, hub: &HubContext, set: &ActionSet) -> StoreResult<()> {
        self.ctx
            .atomically(|ctx| self.persister.save_action_set(hub, ctx, set))
    }

    /// Delete an action set from whichever hub owns it.
    #[instrument(skip(self))]
    pub fn delete_action_set(&self, id: &str) -> StoreResult<()> {
        let hub = self
            .persister
            .find_action_set_hub(&self.ctx, id)?
            .ok_or_else(|| StoreError::not_found("action set", id))?;
        self.delete_action_set_in(&hub, id)
    }

    /// Delete an action set of a known hub.
    #[instrument(skip(self))]
    pub fn delete_action_set_in(&self, hub: &HubContext, id: &str) -> StoreResult<()> {
        let removed = self
            .ctx
            .atomically(|ctx| self.persister.delete_action_set(hub, ctx, id))?;
        if !removed {
            return Err(StoreError::not_found("action set", id));
        }

        info!(hub = %hub, action_set_id = id, "action set deleted");
        Ok(())
    }

    /// Commit and reclaim space.
    pub fn housekeeping(&self) -> StoreResult<()> {
        self.ctx.compact()
    }

    /// Close the underlying context.
    pub fn close(&self) -> StoreResult<()> {
        self.ctx.close()
    }
}

/// Lazy iterator returned by [`ActionSetStore::get_all_action_sets`].
pub struct ActionSets<'a> {
    store: &'a ActionSetStore,
    hub: HubContext,
    ids: std::vec::IntoIter<String>,
}

impl Iterator for ActionSets<'_> {
    type Item = StoreResult<ActionSet>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        Some(self.store.get_action_set(&self.hub, &id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for ActionSets<'_> {}

// ── tests ────────────────────────────────────────────────────────────
