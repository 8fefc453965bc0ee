//! Flattens entities into named maps and sets and restores them.
//!
//! The persister owns the key layout described in [`crate::keys`]; callers
//! only ever see entities. It never commits: a multi-collection write
//! becomes durable when the caller commits the context, so a failure
//! half-way leaves nothing on disk.
//!
//! Action steps are stored at contiguous indices from 0 and restored until
//! the first missing index. Saving a shorter list over a longer one removes
//! the trailing indices.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::context::CollectionContext;
use crate::error::{StoreError, StoreResult};
use crate::keys;
use crate::model::{
    ActionContainer, ActionSet, ContainerClassRef, DeviceContext, HubContext, PluginContext,
};
use crate::resolver::ContainerClassResolver;
use crate::value::Value;

const FIELD_ID: &str = "id";
const FIELD_NAME: &str = "name";
const FIELD_ACTION_COUNT: &str = "actionCount";
const FIELD_PLUGIN_ID: &str = "pluginId";
const FIELD_CONTAINER_CLASS_ID: &str = "containerClassId";

/// Stateless entity codec over a [`CollectionContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionPersister;

impl CollectionPersister {
    pub fn new() -> Self {
        Self
    }

    // ── action sets ──────────────────────────────────────────────────

    /// Write `set` and register its id with the hub. Does not commit.
    #[instrument(skip(self, ctx, set), fields(action_set_id = %set.id()))]
    pub fn save_action_set(
        &self,
        hub: &HubContext,
        ctx: &CollectionContext,
        set: &ActionSet,
    ) -> StoreResult<()> {
        let id = set.id();

        ctx.set_map(
            &keys::action_set(hub, id),
            [
                (FIELD_ID, Value::from(id)),
                (FIELD_NAME, Value::from(set.name.clone())),
                (FIELD_ACTION_COUNT, Value::Integer(set.actions.len() as i64)),
            ],
        )?;

        for (index, action) in set.actions.iter().enumerate() {
            let class = &action.container_class;
            ctx.set_map(
                &keys::action(hub, id, index),
                [
                    (FIELD_PLUGIN_ID, Value::from(class.plugin_id.as_str())),
                    (
                        FIELD_CONTAINER_CLASS_ID,
                        Value::from(class.container_class_id.as_str()),
                    ),
                ],
            )?;
            ctx.set_map(
                &keys::action_values(hub, id, index),
                action.values.iter().map(|(k, v)| (k.as_str(), v.clone())),
            )?;
        }

        let stale = self.clear_actions_from(hub, ctx, id, set.actions.len())?;

        ctx.add_set_value(&keys::action_sets(hub), Value::from(id))?;

        debug!(
            hub = %hub,
            actions = set.actions.len(),
            stale_removed = stale,
            "action set saved"
        );
        Ok(())
    }

    /// Rebuild the action set `id`, validating every step through `resolver`.
    #[instrument(skip(self, ctx, resolver))]
    pub fn restore_action_set(
        &self,
        hub: &HubContext,
        ctx: &CollectionContext,
        resolver: &dyn ContainerClassResolver,
        id: &str,
    ) -> StoreResult<ActionSet> {
        if !ctx.has_set_value(&keys::action_sets(hub), &Value::from(id))? {
            return Err(StoreError::not_found("action set", id));
        }

        let Some(meta) = ctx.read_map(&keys::action_set(hub, id))? else {
            return Err(StoreError::not_found("action set", id));
        };
        let name = meta
            .get(FIELD_NAME)
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut actions = Vec::new();
        for index in 0.. {
            let Some(step) = ctx.read_map(&keys::action(hub, id, index))? else {
                break;
            };

            let class_ref = ContainerClassRef::new(
                required_str(&step, FIELD_PLUGIN_ID, id, index)?,
                required_str(&step, FIELD_CONTAINER_CLASS_ID, id, index)?,
            );
            let values: BTreeMap<String, Value> = ctx
                .read_map(&keys::action_values(hub, id, index))?
                .unwrap_or_default()
                .into_iter()
                .collect();

            let class = resolver.resolve(&class_ref).ok_or_else(|| {
                StoreError::Validation(format!(
                    "action {index} of set {id} references unknown container class {class_ref}"
                ))
            })?;
            class.validate(&values)?;

            actions.push(ActionContainer {
                container_class: class_ref,
                values,
            });
        }

        debug!(hub = %hub, actions = actions.len(), "action set restored");
        Ok(ActionSet::with_id(id, name, actions))
    }

    /// Id embedded in `raw_key` if it is an action-set metadata name of `hub`.
    pub fn get_action_set_id_from_key(&self, hub: &HubContext, raw_key: &str) -> Option<String> {
        keys::parse_action_set(raw_key)
            .filter(|(key_hub, _)| key_hub == hub)
            .map(|(_, id)| id)
    }

    /// Ids of `hub` found by scanning collection names rather than the
    /// tracking set.
    pub fn scan_action_set_ids(
        &self,
        hub: &HubContext,
        ctx: &CollectionContext,
    ) -> StoreResult<Vec<String>> {
        let prefix = format!("{}:", keys::action_sets(hub));
        Ok(ctx
            .names_with_prefix(&prefix)?
            .iter()
            .filter_map(|name| self.get_action_set_id_from_key(hub, name))
            .collect())
    }

    /// Hub that owns action set `id`, if any.
    pub fn find_action_set_hub(
        &self,
        ctx: &CollectionContext,
        id: &str,
    ) -> StoreResult<Option<HubContext>> {
        Ok(ctx
            .names_with_prefix("hubs:")?
            .iter()
            .filter_map(|name| keys::parse_action_set(name))
            .find(|(_, found)| found == id)
            .map(|(hub, _)| hub))
    }

    /// Remove every collection of action set `id` and its tracking entry.
    /// Does not commit. Returns `true` if anything was removed.
    #[instrument(skip(self, ctx))]
    pub fn delete_action_set(
        &self,
        hub: &HubContext,
        ctx: &CollectionContext,
        id: &str,
    ) -> StoreResult<bool> {
        let mut removed = ctx.remove(&keys::action_set(hub, id))?;
        for name in ctx.names_with_prefix(&keys::action_prefix(hub, id))? {
            removed |= ctx.remove(&name)?;
        }
        removed |= ctx.remove_from_set(&keys::action_sets(hub), &Value::from(id))?;

        debug!(hub = %hub, removed, "action set deleted");
        Ok(removed)
    }

    /// Drop step collections at `from` and above. Returns how many
    /// collections were removed.
    fn clear_actions_from(
        &self,
        hub: &HubContext,
        ctx: &CollectionContext,
        id: &str,
        from: usize,
    ) -> StoreResult<usize> {
        let prefix = keys::action_prefix(hub, id);
        let mut removed = 0;
        for name in ctx.names_with_prefix(&prefix)? {
            if keys::parse_action_index(&prefix, &name).is_some_and(|index| index >= from) {
                ctx.remove(&name)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ── configuration ────────────────────────────────────────────────

    /// Merge `values` into the stored configuration of `plugin`. Does not commit.
    pub fn save_plugin_configuration<'a, I>(
        &self,
        ctx: &CollectionContext,
        plugin: &PluginContext,
        values: I,
    ) -> StoreResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        merge_configuration(ctx, &keys::plugin_configuration(plugin), values)?;
        debug!(plugin = %plugin, "plugin configuration saved");
        Ok(())
    }

    /// Stored configuration of `plugin`; empty if never configured.
    pub fn restore_plugin_configuration(
        &self,
        ctx: &CollectionContext,
        plugin: &PluginContext,
    ) -> StoreResult<BTreeMap<String, Value>> {
        read_configuration(ctx, &keys::plugin_configuration(plugin))
    }

    /// Remove the configuration of `plugin`. Does not commit.
    pub fn delete_plugin_configuration(
        &self,
        ctx: &CollectionContext,
        plugin: &PluginContext,
    ) -> StoreResult<bool> {
        ctx.remove(&keys::plugin_configuration(plugin))
    }

    /// Merge `values` into the stored configuration of `hub`. Does not commit.
    pub fn save_hub_configuration<'a, I>(
        &self,
        ctx: &CollectionContext,
        hub: &HubContext,
        values: I,
    ) -> StoreResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        merge_configuration(ctx, &keys::hub_configuration(hub), values)?;
        debug!(hub = %hub, "hub configuration saved");
        Ok(())
    }

    /// Stored configuration of `hub`; empty if never configured.
    pub fn restore_hub_configuration(
        &self,
        ctx: &CollectionContext,
        hub: &HubContext,
    ) -> StoreResult<BTreeMap<String, Value>> {
        read_configuration(ctx, &keys::hub_configuration(hub))
    }

    /// Remove the configuration of `hub`. Does not commit.
    pub fn delete_hub_configuration(
        &self,
        ctx: &CollectionContext,
        hub: &HubContext,
    ) -> StoreResult<bool> {
        ctx.remove(&keys::hub_configuration(hub))
    }

    /// Merge `values` into the stored configuration of `device`. Does not commit.
    pub fn save_device_configuration<'a, I>(
        &self,
        ctx: &CollectionContext,
        device: &DeviceContext,
        values: I,
    ) -> StoreResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        merge_configuration(ctx, &keys::device_configuration(device), values)?;
        debug!(device = %device, "device configuration saved");
        Ok(())
    }

    /// Stored configuration of `device`; empty if never configured.
    pub fn restore_device_configuration(
        &self,
        ctx: &CollectionContext,
        device: &DeviceContext,
    ) -> StoreResult<BTreeMap<String, Value>> {
        read_configuration(ctx, &keys::device_configuration(device))
    }

    /// Remove the configuration of `device`. Does not commit.
    pub fn delete_device_configuration(
        &self,
        ctx: &CollectionContext,
        device: &DeviceContext,
    ) -> StoreResult<bool> {
        ctx.remove(&keys::device_configuration(device))
    }
}

fn merge_configuration<'a, I>(ctx: &CollectionContext, name: &str, values: I) -> StoreResult<()>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let map = ctx.get_map(name)?;
    for (key, value) in values {
        map.insert(key, value.clone())?;
    }
    Ok(())
}

fn read_configuration(ctx: &CollectionContext, name: &str) -> StoreResult<BTreeMap<String, Value>> {
    Ok(ctx
        .read_map(name)?
        .unwrap_or_default()
        .into_iter()
        .collect())
}

fn required_str(
    step: &std::collections::HashMap<String, Value>,
    field: &str,
    id: &str,
    index: usize,
) -> StoreResult<String> {
    step.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            StoreError::Validation(format!("action {index} of set {id} has no `{field}`"))
        })
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ContainerClass, ContainerClassRegistry, PropertyDefinition};

    fn registry() -> ContainerClassRegistry {
        let registry = ContainerClassRegistry::new();
        registry.register(ContainerClass::new(
            ContainerClassRef::new("plugin1", "cc1"),
            "Turn on",
        ));
        registry.register(
            ContainerClass::new(ContainerClassRef::new("plugin1", "dim"), "Dim")
                .with_property(PropertyDefinition::required("level", "Level")),
        );
        registry
    }

    fn turn_on(device: &str) -> ActionContainer {
        ActionContainer::new(ContainerClassRef::new("plugin1", "cc1")).with_value("device", device)
    }

    #[test]
    fn save_then_restore_preserves_order() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let set = ActionSet::new(
            Some("evening".into()),
            vec![turn_on("a"), turn_on("b"), turn_on("c")],
        );
        persister.save_action_set(&hub, &ctx, &set).unwrap();

        let restored = persister
            .restore_action_set(&hub, &ctx, &registry(), set.id())
            .unwrap();
        assert_eq!(restored, set);
    }

    #[test]
    fn empty_action_list_round_trips() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let set = ActionSet::new(None, vec![]);
        persister.save_action_set(&hub, &ctx, &set).unwrap();

        let restored = persister
            .restore_action_set(&hub, &ctx, &registry(), set.id())
            .unwrap();
        assert!(restored.actions.is_empty());
        assert!(restored.name.is_none());
    }

    #[test]
    fn restore_unknown_id_is_not_found() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let err = CollectionPersister::new()
            .restore_action_set(&HubContext::local(), &ctx, &registry(), "missing")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn resave_shorter_list_clears_trailing_steps() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let mut set = ActionSet::new(None, vec![turn_on("a"), turn_on("b"), turn_on("c")]);
        persister.save_action_set(&hub, &ctx, &set).unwrap();

        set.actions.truncate(1);
        persister.save_action_set(&hub, &ctx, &set).unwrap();

        let leftovers = ctx
            .names_with_prefix(&keys::action_prefix(&hub, set.id()))
            .unwrap();
        assert_eq!(
            leftovers,
            vec![keys::action(&hub, set.id(), 0), keys::action_values(&hub, set.id(), 0)]
        );

        // Growing again must not resurrect old values.
        set.actions.push(turn_on("z"));
        persister.save_action_set(&hub, &ctx, &set).unwrap();
        let restored = persister
            .restore_action_set(&hub, &ctx, &registry(), set.id())
            .unwrap();
        assert_eq!(restored.actions.len(), 2);
        assert_eq!(restored.actions[1].property_value("device"), Some(&Value::from("z")));
    }

    #[test]
    fn restore_stops_at_first_gap() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let set = ActionSet::new(None, vec![turn_on("a"), turn_on("b"), turn_on("c")]);
        persister.save_action_set(&hub, &ctx, &set).unwrap();
        ctx.remove(&keys::action(&hub, set.id(), 1)).unwrap();

        let restored = persister
            .restore_action_set(&hub, &ctx, &registry(), set.id())
            .unwrap();
        assert_eq!(restored.actions.len(), 1);
    }

    #[test]
    fn unresolvable_class_is_validation_error() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let set = ActionSet::new(
            None,
            vec![ActionContainer::new(ContainerClassRef::new("gone", "cc"))],
        );
        persister.save_action_set(&hub, &ctx, &set).unwrap();

        let err = persister
            .restore_action_set(&hub, &ctx, &registry(), set.id())
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn missing_required_property_is_validation_error() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let set = ActionSet::new(
            None,
            vec![ActionContainer::new(ContainerClassRef::new("plugin1", "dim"))],
        );
        persister.save_action_set(&hub, &ctx, &set).unwrap();

        let err = persister
            .restore_action_set(&hub, &ctx, &registry(), set.id())
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn malformed_step_is_validation_error() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let set = ActionSet::new(None, vec![turn_on("a")]);
        persister.save_action_set(&hub, &ctx, &set).unwrap();
        ctx.set_map(&keys::action(&hub, set.id(), 0), [("pluginId", Value::from(1))])
            .unwrap();

        let err = persister
            .restore_action_set(&hub, &ctx, &registry(), set.id())
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn id_from_key_is_hub_scoped() {
        let persister = CollectionPersister::new();
        let x = HubContext::new("x");
        let y = HubContext::new("y");
        let key = keys::action_set(&x, "abc");

        assert_eq!(persister.get_action_set_id_from_key(&x, &key).as_deref(), Some("abc"));
        assert_eq!(persister.get_action_set_id_from_key(&y, &key), None);
        assert_eq!(
            persister.get_action_set_id_from_key(&x, &keys::action(&x, "abc", 0)),
            None
        );
        assert_eq!(persister.get_action_set_id_from_key(&x, &keys::action_sets(&x)), None);
    }

    #[test]
    fn scan_and_find() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let persister = CollectionPersister::new();
        let x = HubContext::new("x");
        let y = HubContext::new("y");

        let in_x = ActionSet::new(None, vec![turn_on("a")]);
        let in_y = ActionSet::new(None, vec![]);
        persister.save_action_set(&x, &ctx, &in_x).unwrap();
        persister.save_action_set(&y, &ctx, &in_y).unwrap();

        assert_eq!(persister.scan_action_set_ids(&x, &ctx).unwrap(), vec![in_x.id().to_string()]);
        assert_eq!(persister.find_action_set_hub(&ctx, in_y.id()).unwrap(), Some(y));
        assert_eq!(persister.find_action_set_hub(&ctx, "nope").unwrap(), None);
    }

    #[test]
    fn delete_removes_every_collection() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let hub = HubContext::local();
        let persister = CollectionPersister::new();

        let keep = ActionSet::new(None, vec![turn_on("k")]);
        let doomed = ActionSet::new(None, vec![turn_on("a"), turn_on("b")]);
        persister.save_action_set(&hub, &ctx, &keep).unwrap();
        persister.save_action_set(&hub, &ctx, &doomed).unwrap();

        assert!(persister.delete_action_set(&hub, &ctx, doomed.id()).unwrap());
        assert!(!persister.delete_action_set(&hub, &ctx, doomed.id()).unwrap());

        assert!(ctx
            .names_with_prefix(&keys::action_set(&hub, doomed.id()))
            .unwrap()
            .is_empty());
        assert!(persister
            .restore_action_set(&hub, &ctx, &registry(), doomed.id())
            .unwrap_err()
            .is_not_found());
        persister
            .restore_action_set(&hub, &ctx, &registry(), keep.id())
            .unwrap();
    }

    #[test]
    fn plugin_configuration_merges() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let persister = CollectionPersister::new();
        let plugin = PluginContext::local("zwave");

        let port = Value::from("/dev/ttyUSB0");
        let baud = Value::from(115_200);
        persister
            .save_plugin_configuration(&ctx, &plugin, [("port", &port)])
            .unwrap();
        persister
            .save_plugin_configuration(&ctx, &plugin, [("baud", &baud)])
            .unwrap();

        let config = persister.restore_plugin_configuration(&ctx, &plugin).unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("port"), Some(&port));

        assert!(persister.delete_plugin_configuration(&ctx, &plugin).unwrap());
        assert!(persister
            .restore_plugin_configuration(&ctx, &plugin)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn configuration_scopes_are_independent() {
        let ctx = CollectionContext::open_in_memory().unwrap();
        let persister = CollectionPersister::new();
        let hub = HubContext::local();
        let plugin = PluginContext::local("zwave");
        let device = DeviceContext::local("zwave", "node7");

        let password = Value::from("secret");
        let port = Value::from("/dev/ttyUSB0");
        let name = Value::from("Porch light");
        persister
            .save_hub_configuration(&ctx, &hub, [("adminPassword", &password)])
            .unwrap();
        persister
            .save_plugin_configuration(&ctx, &plugin, [("port", &port)])
            .unwrap();
        persister
            .save_device_configuration(&ctx, &device, [("name", &name)])
            .unwrap();

        let hub_config = persister.restore_hub_configuration(&ctx, &hub).unwrap();
        assert_eq!(hub_config.len(), 1);
        assert_eq!(hub_config.get("adminPassword"), Some(&password));

        let device_config = persister.restore_device_configuration(&ctx, &device).unwrap();
        assert_eq!(device_config.len(), 1);
        assert_eq!(device_config.get("name"), Some(&name));

        assert!(persister.delete_hub_configuration(&ctx, &hub).unwrap());
        assert!(persister.restore_hub_configuration(&ctx, &hub).unwrap().is_empty());
        assert_eq!(persister.restore_plugin_configuration(&ctx, &plugin).unwrap().len(), 1);
        assert!(persister.delete_device_configuration(&ctx, &device).unwrap());
        assert!(!persister.delete_device_configuration(&ctx, &device).unwrap());
    }
}
