//! Composite collection names for persisted entities.
//!
//! Every name is a `:`-separated path rooted at the hub:
//!
//! ```text
//! hubs:{hub}:actionSets                              set of action-set ids
//! hubs:{hub}:actionSets:{id}                         action-set metadata map
//! hubs:{hub}:actionSets:{id}:actions:{n}             step n class reference
//! hubs:{hub}:actionSets:{id}:actions:{n}:values      step n property values
//! hubs:{hub}:configuration                          hub configuration
//! hubs:{hub}:plugins:{plugin}:configuration          plugin configuration
//! hubs:{hub}:devices:{plugin}:{device}:configuration device configuration
//! ```
//!
//! Caller-supplied segments are escaped (`%` → `%25`, `:` → `%3A`), so a
//! name splits back into exactly the segments it was built from.

use crate::model::{DeviceContext, HubContext, PluginContext};

const HUBS: &str = "hubs";
const ACTION_SETS: &str = "actionSets";
const ACTIONS: &str = "actions";
const VALUES: &str = "values";
const PLUGINS: &str = "plugins";
const DEVICES: &str = "devices";
const CONFIGURATION: &str = "configuration";

fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}

fn unescape(segment: &str) -> String {
    segment.replace("%3A", ":").replace("%25", "%")
}

fn hub_root(hub: &HubContext) -> String {
    format!("{HUBS}:{}", escape(hub.hub_id()))
}

/// Set tracking every action-set id of `hub`.
pub fn action_sets(hub: &HubContext) -> String {
    format!("{}:{ACTION_SETS}", hub_root(hub))
}

/// Metadata map of one action set.
pub fn action_set(hub: &HubContext, id: &str) -> String {
    format!("{}:{}", action_sets(hub), escape(id))
}

/// Prefix shared by every step collection of one action set.
pub fn action_prefix(hub: &HubContext, id: &str) -> String {
    format!("{}:{ACTIONS}:", action_set(hub, id))
}

/// Class-reference map of step `index`.
pub fn action(hub: &HubContext, id: &str, index: usize) -> String {
    format!("{}{index}", action_prefix(hub, id))
}

/// Property-value map of step `index`.
pub fn action_values(hub: &HubContext, id: &str, index: usize) -> String {
    format!("{}:{VALUES}", action(hub, id, index))
}

/// Configuration map of a plugin.
pub fn plugin_configuration(plugin: &PluginContext) -> String {
    format!(
        "{}:{PLUGINS}:{}:{CONFIGURATION}",
        hub_root(&plugin.hub),
        escape(&plugin.plugin_id)
    )
}

/// Configuration map of a hub.
pub fn hub_configuration(hub: &HubContext) -> String {
    format!("{}:{CONFIGURATION}", hub_root(hub))
}

/// Configuration map of a device.
pub fn device_configuration(device: &DeviceContext) -> String {
    format!(
        "{}:{DEVICES}:{}:{}:{CONFIGURATION}",
        hub_root(device.hub()),
        escape(&device.plugin.plugin_id),
        escape(&device.device_id)
    )
}

/// Split an action-set metadata name into `(hub, id)`.
///
/// Step, value, tracking and plugin names all return `None`.
pub fn parse_action_set(raw: &str) -> Option<(HubContext, String)> {
    let segments: Vec<&str> = raw.split(':').collect();
    match segments.as_slice() {
        [HUBS, hub, ACTION_SETS, id] if !hub.is_empty() && !id.is_empty() => {
            Some((HubContext::new(unescape(hub)), unescape(id)))
        }
        _ => None,
    }
}

/// Step index of a step collection (class reference or values) under
/// `prefix`, which must come from [`action_prefix`].
pub fn parse_action_index(prefix: &str, raw: &str) -> Option<usize> {
    let index = raw.strip_prefix(prefix)?.split(':').next()?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let hub = HubContext::local();
        assert_eq!(action_sets(&hub), "hubs:local:actionSets");
        assert_eq!(action_set(&hub, "abc"), "hubs:local:actionSets:abc");
        assert_eq!(action(&hub, "abc", 2), "hubs:local:actionSets:abc:actions:2");
        assert_eq!(
            action_values(&hub, "abc", 2),
            "hubs:local:actionSets:abc:actions:2:values"
        );
        assert_eq!(
            plugin_configuration(&PluginContext::local("zwave")),
            "hubs:local:plugins:zwave:configuration"
        );
        assert_eq!(hub_configuration(&hub), "hubs:local:configuration");
        assert_eq!(
            device_configuration(&DeviceContext::local("zwave", "node:7")),
            "hubs:local:devices:zwave:node%3A7:configuration"
        );
    }

    #[test]
    fn parse_metadata_name() {
        let hub = HubContext::local();
        let (parsed_hub, id) = parse_action_set(&action_set(&hub, "abc")).unwrap();
        assert_eq!(parsed_hub, hub);
        assert_eq!(id, "abc");
    }

    #[test]
    fn parse_rejects_other_names() {
        let hub = HubContext::local();
        assert!(parse_action_set(&action_sets(&hub)).is_none());
        assert!(parse_action_set(&action(&hub, "abc", 0)).is_none());
        assert!(parse_action_set(&action_values(&hub, "abc", 0)).is_none());
        assert!(parse_action_set(&plugin_configuration(&PluginContext::local("p"))).is_none());
        assert!(parse_action_set(&hub_configuration(&hub)).is_none());
        assert!(parse_action_set(&device_configuration(&DeviceContext::local("p", "d"))).is_none());
        assert!(parse_action_set("hubs::actionSets:abc").is_none());
        assert!(parse_action_set("garbage").is_none());
    }

    #[test]
    fn separators_in_ids_are_escaped() {
        let hub = HubContext::new("hub:1%");
        let key = action_set(&hub, "id:with:colons");
        assert_eq!(key, "hubs:hub%3A1%25:actionSets:id%3Awith%3Acolons");

        let (parsed_hub, id) = parse_action_set(&key).unwrap();
        assert_eq!(parsed_hub, hub);
        assert_eq!(id, "id:with:colons");
    }

    #[test]
    fn escaped_percent_round_trips() {
        let hub = HubContext::new("a%3Ab");
        let (parsed_hub, _) = parse_action_set(&action_set(&hub, "x")).unwrap();
        assert_eq!(parsed_hub, hub);
    }

    #[test]
    fn action_index_parsing() {
        let hub = HubContext::local();
        let prefix = action_prefix(&hub, "abc");
        assert_eq!(parse_action_index(&prefix, &action(&hub, "abc", 12)), Some(12));
        assert_eq!(parse_action_index(&prefix, &action_values(&hub, "abc", 12)), Some(12));
        assert_eq!(parse_action_index(&prefix, &format!("{prefix}x1")), None);
        assert_eq!(parse_action_index(&prefix, &action(&hub, "other", 1)), None);
    }
}
