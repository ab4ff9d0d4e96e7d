/// `weft cache` command implementation
///
/// Shows cached outputs per resource.
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;

use super::open_workspace;
use crate::cache::{CacheEntry, OutputCache};
use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::{format_ttl, weft_prefix};
use crate::workspace::Workspace;

pub fn cache(project_dir: Option<&str>, args: &CacheArgs) -> Result<()> {
    let workspace = open_workspace(project_dir)?;

    match &args.command {
        CacheCommands::Show { name } => show(&workspace, name),
        CacheCommands::List { json } => list(&workspace, *json),
    }
}

/// Print the cached output paths of one resource, one per line
fn show(workspace: &Workspace, name: &str) -> Result<()> {
    let engine = workspace.engine();
    engine
        .resolve(name)
        .with_context(|| format!("Failed to look up '{}'", name))?;

    match engine.get_cached_outputs(name) {
        Some(paths) => {
            for path in paths {
                println!("{}", path.display());
            }
            Ok(())
        }
        None => anyhow::bail!("No cached output for '{}'", name),
    }
}

fn list(workspace: &Workspace, json: bool) -> Result<()> {
    let entries = workspace.cache().entries();

    if json {
        let map: BTreeMap<String, CacheEntry> = entries.into_iter().collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("{} Cache is empty", weft_prefix());
        return Ok(());
    }

    let now = Utc::now();
    println!("Cached resources ({}):", entries.len());
    println!();
    for (id, entry) in &entries {
        let ttl = entry
            .ttl
            .unwrap_or(workspace.config().result_cache_ttl);
        let fresh = OutputCache::is_fresh(entry, Duration::from_secs(ttl), now);
        let age = match entry.age(now).as_secs() {
            0 => "0s".to_string(),
            secs => format_ttl(Some(secs)),
        };

        println!("  {}", id);
        println!(
            "    Stored: {} ({} ago, TTL {}, {})",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            age,
            format_ttl(Some(ttl)),
            if fresh { "fresh" } else { "stale" }
        );
        for path in &entry.output_paths {
            println!("    {}", path.display());
        }
    }

    Ok(())
}
