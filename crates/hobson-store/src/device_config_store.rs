//! Per-device configuration, persisted as one map per device.
//!
//! Reads through a configuration class yield one entry per property the
//! class declares, so callers always see the full shape even when only
//! some values were ever stored.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::context::CollectionContext;
use crate::error::StoreResult;
use crate::model::{ActionContainer, DeviceContext};
use crate::persister::CollectionPersister;
use crate::resolver::ContainerClass;
use crate::value::Value;

/// Property that falls back to the device's default name when unset.
const NAME_PROPERTY: &str = "name";

/// Read and write device configuration values.
#[derive(Debug, Clone)]
pub struct DeviceConfigStore {
    ctx: Arc<CollectionContext>,
    persister: CollectionPersister,
}

impl DeviceConfigStore {
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

    /// The configuration of `device` shaped by `class`.
    ///
    /// Every declared property is present; those never stored are
    /// [`Value::Null`], except `name`, which falls back to `default_name`.
    /// Stored values the class does not declare are left out.
    pub fn get_device_configuration(
        &self,
        device: &DeviceContext,
        class: &ContainerClass,
        default_name: Option<&str>,
    ) -> StoreResult<ActionContainer> {
        let mut stored = self.persister.restore_device_configuration(&self.ctx, device)?;

        let mut container = ActionContainer::new(class.reference.clone());
        for property in &class.properties {
            let mut value = stored.remove(&property.id).unwrap_or(Value::Null);
            if property.id == NAME_PROPERTY && value.is_null() {
                value = Value::from(default_name);
            }
            container.values.insert(property.id.clone(), value);
        }
        Ok(container)
    }

    /// Every stored value of `device`, sorted by name.
    pub fn get_device_configuration_values(
        &self,
        device: &DeviceContext,
    ) -> StoreResult<BTreeMap<String, Value>> {
        self.persister.restore_device_configuration(&self.ctx, device)
    }

    pub fn get_device_configuration_property(
        &self,
        device: &DeviceContext,
        name: &str,
    ) -> StoreResult<Option<Value>> {
        Ok(self.get_device_configuration_values(device)?.remove(name))
    }

    /// Replace the whole configuration of `device` with `values`.
    ///
    /// Required properties of `class` are checked before anything is written.
    #[instrument(skip(self, class, values), fields(device = %device, values = values.len()))]
    pub fn set_device_configuration_properties(
        &self,
        device: &DeviceContext,
        class: &ContainerClass,
        values: &BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        class.validate(values)?;
        self.ctx.atomically(|ctx| {
            self.persister.delete_device_configuration(ctx, device)?;
            self.persister
                .save_device_configuration(ctx, device, values.iter().map(|(k, v)| (k.as_str(), v)))
        })?;

        info!("device configuration replaced");
        Ok(())
    }

    /// Set one property, leaving the others as they are.
    #[instrument(skip(self, value), fields(device = %device))]
    pub fn set_device_configuration_property(
        &self,
        device: &DeviceContext,
        name: &str,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        let value = value.into();
        self.ctx.atomically(|ctx| {
            self.persister
                .save_device_configuration(ctx, device, [(name, &value)])
        })
    }

    /// Forget the configuration of `device`. Returns whether any existed.
    #[instrument(skip(self), fields(device = %device))]
    pub fn delete_device_configuration(&self, device: &DeviceContext) -> StoreResult<bool> {
        let removed = self
            .ctx
            .atomically(|ctx| self.persister.delete_device_configuration(ctx, device))?;
        if removed {
            info!("device configuration deleted");
        }
        Ok(removed)
    }

    /// Close the underlying context.
    pub fn close(&self) -> StoreResult<()> {
        self.ctx.close()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::ContainerClassRef;
    use crate::resolver::PropertyDefinition;

    fn device_class() -> ContainerClass {
        ContainerClass::new(ContainerClassRef::new("plugin1", "configuration"), "Device")
            .with_property(PropertyDefinition::optional("name", "Name"))
            .with_property(PropertyDefinition::optional("foo", "foo"))
            .with_property(PropertyDefinition::optional("bar", "bar"))
    }

    fn setup_store() -> DeviceConfigStore {
        DeviceConfigStore::new(Arc::new(CollectionContext::open_in_memory().unwrap()))
    }

    #[test]
    fn unconfigured_device_has_every_declared_property() {
        let store = setup_store();
        let device = DeviceContext::local("plugin1", "device1");

        let config = store
            .get_device_configuration(&device, &device_class(), Some("Porch light"))
            .unwrap();
        assert_eq!(config.container_class, ContainerClassRef::new("plugin1", "configuration"));
        assert_eq!(config.values.len(), 3);
        assert_eq!(config.property_value("name"), Some(&Value::from("Porch light")));
        assert_eq!(config.property_value("foo"), Some(&Value::Null));
    }

    #[test]
    fn stored_name_wins_over_default() {
        let store = setup_store();
        let device = DeviceContext::local("plugin1", "device1");
        store
            .set_device_configuration_property(&device, "name", "Garage door")
            .unwrap();

        let config = store
            .get_device_configuration(&device, &device_class(), Some("Porch light"))
            .unwrap();
        assert_eq!(config.property_value("name"), Some(&Value::from("Garage door")));

        let config = store.get_device_configuration(&device, &device_class(), None).unwrap();
        assert_eq!(config.property_value("name"), Some(&Value::from("Garage door")));
    }

    #[test]
    fn two_individual_properties_both_land() {
        let store = setup_store();
        let device = DeviceContext::local("plugin1", "device1");

        store.set_device_configuration_property(&device, "foo", "bar").unwrap();
        store.set_device_configuration_property(&device, "bar", "foo").unwrap();

        let values = store.get_device_configuration_values(&device).unwrap();
        assert_eq!(values.get("foo"), Some(&Value::from("bar")));
        assert_eq!(values.get("bar"), Some(&Value::from("foo")));
        assert_eq!(
            store.get_device_configuration_property(&device, "bar").unwrap(),
            Some(Value::from("foo"))
        );
    }

    #[test]
    fn undeclared_values_are_hidden_by_class() {
        let store = setup_store();
        let device = DeviceContext::local("plugin1", "device1");
        store.set_device_configuration_property(&device, "legacy", 1).unwrap();

        let config = store.get_device_configuration(&device, &device_class(), None).unwrap();
        assert_eq!(config.property_value("legacy"), None);
        assert_eq!(config.property_value("name"), Some(&Value::Null));
    }

    #[test]
    fn set_properties_replaces_everything() {
        let store = setup_store();
        let device = DeviceContext::local("plugin1", "device1");
        let class = device_class();
        store.set_device_configuration_property(&device, "foo", "old").unwrap();

        let mut values = BTreeMap::new();
        values.insert("bar".to_string(), Value::from("new"));
        store
            .set_device_configuration_properties(&device, &class, &values)
            .unwrap();

        assert_eq!(store.get_device_configuration_values(&device).unwrap(), values);
    }

    #[test]
    fn set_properties_checks_required() {
        let store = setup_store();
        let device = DeviceContext::local("plugin1", "device1");
        let class = device_class().with_property(PropertyDefinition::required("port", "Port"));
        store.set_device_configuration_property(&device, "foo", "kept").unwrap();

        let err = store
            .set_device_configuration_properties(&device, &class, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(
            store.get_device_configuration_property(&device, "foo").unwrap(),
            Some(Value::from("kept"))
        );
    }

    #[test]
    fn devices_do_not_share_configuration() {
        let store = setup_store();
        store
            .set_device_configuration_property(&DeviceContext::local("plugin1", "device1"), "foo", "x")
            .unwrap();

        let other = DeviceContext::local("plugin1", "device2");
        assert!(store.get_device_configuration_values(&other).unwrap().is_empty());
        assert!(!store.delete_device_configuration(&other).unwrap());
        assert!(store
            .delete_device_configuration(&DeviceContext::local("plugin1", "device1"))
            .unwrap());
    }
}
