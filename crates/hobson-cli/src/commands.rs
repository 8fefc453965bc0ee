//! Subcommand implementations.
//!
//! Each command opens its own context, does its work, and closes the
//! context before returning the text to print.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use hobson_store::{
    ActionSet, ActionSetStore, CollectionContext, ContainerClass, ContainerClassRef,
    ContainerClassResolver, HubContext, StoreConfig, StoreResult, Value,
};
use tracing::info;

/// Resolves every class, so stored sets can be dumped without the plugins
/// that define them being loaded.
fn permissive_resolver() -> Arc<dyn ContainerClassResolver> {
    Arc::new(|reference: &ContainerClassRef| {
        Some(ContainerClass::new(
            reference.clone(),
            reference.container_class_id.clone(),
        ))
    })
}

fn open(config: &StoreConfig) -> Result<CollectionContext> {
    CollectionContext::open_with(config)
        .with_context(|| format!("failed to open store {}", config.path.display()))
}

/// Collection names under `prefix`, one per line, tagged with their kind.
pub fn collections(config: &StoreConfig, prefix: &str) -> Result<String> {
    let ctx = open(config)?;
    let mut out = String::new();
    for name in ctx.names_with_prefix(prefix)? {
        let kind = if ctx.has_map(&name)? { "map" } else { "set" };
        out.push_str(&format!("{kind}\t{name}\n"));
    }
    ctx.close()?;
    Ok(out)
}

/// One collection as pretty JSON.
pub fn show(config: &StoreConfig, name: &str) -> Result<String> {
    let ctx = open(config)?;
    let json = if ctx.has_map(name)? {
        let sorted: BTreeMap<String, Value> =
            ctx.read_map(name)?.unwrap_or_default().into_iter().collect();
        serde_json::to_string_pretty(&sorted)?
    } else if ctx.has_set(name)? {
        serde_json::to_string_pretty(&ctx.read_set(name)?.unwrap_or_default())?
    } else {
        bail!("no collection named `{name}`");
    };
    ctx.close()?;
    Ok(json)
}

/// Every action set of `hub` as a pretty JSON array.
pub fn action_sets(config: &StoreConfig, hub: &str) -> Result<String> {
    let store = ActionSetStore::new(Arc::new(open(config)?), permissive_resolver());
    let sets: Vec<ActionSet> = store
        .get_all_action_sets(&HubContext::new(hub))?
        .collect::<StoreResult<_>>()
        .with_context(|| format!("failed to restore action sets of hub `{hub}`"))?;
    store.close()?;
    Ok(serde_json::to_string_pretty(&sets)?)
}

/// Delete one action set.
pub fn delete_action_set(config: &StoreConfig, id: &str) -> Result<String> {
    let store = ActionSetStore::new(Arc::new(open(config)?), permissive_resolver());
    store
        .delete_action_set(id)
        .with_context(|| format!("failed to delete action set `{id}`"))?;
    store.close()?;
    info!(action_set_id = id, "deleted");
    Ok(format!("deleted {id}\n"))
}

/// Commit and vacuum the store file.
pub fn compact(config: &StoreConfig) -> Result<String> {
    let before = file_len(config);
    let ctx = open(config)?;
    ctx.compact()?;
    ctx.close()?;
    let after = file_len(config);
    Ok(format!("compacted {}: {before} -> {after} bytes\n", config.path.display()))
}

fn file_len(config: &StoreConfig) -> u64 {
    std::fs::metadata(&config.path).map(|m| m.len()).unwrap_or(0)
}

// ── tests ────────────────────────────────────────────────────────────
