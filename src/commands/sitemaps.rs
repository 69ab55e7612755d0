//! Sitemap registration commands

use super::display_timestamp;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputLayout;
use crate::store::{LinkStore, Sitemap};
use std::collections::BTreeMap;
use tracing::info;

/// Parse `key=value` context entries
pub fn parse_context(entries: &[String]) -> Result<BTreeMap<String, String>> {
    let mut context = BTreeMap::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!("Invalid context entry '{}', expected key=value", entry))
            })?;
        context.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(context)
}

/// Register a sitemap for `context`. Registering an existing context is a no-op.
pub async fn cmd_add_sitemap(store: &LinkStore, entries: &[String]) -> Result<Sitemap> {
    let sitemap = Sitemap::new(parse_context(entries)?);
    if let Some(existing) = store.get_sitemap(&sitemap.id).await? {
        return Ok(existing);
    }
    store.save_sitemap(&sitemap).await?;
    store.notify_regeneration_needed().await?;
    info!(sitemap = %sitemap.id, "Registered sitemap");
    Ok(sitemap)
}

pub async fn cmd_list_sitemaps(store: &LinkStore) -> Result<Vec<Sitemap>> {
    store.list_sitemaps().await
}

/// Drop a sitemap and its generated files
pub async fn cmd_remove_sitemap(config: &Config, store: &LinkStore, id: &str) -> Result<usize> {
    if !store.delete_sitemap(id).await? {
        return Err(Error::SitemapNotFound(id.to_string()));
    }
    let removed = OutputLayout::new(&config.paths.output_dir).remove_sitemap(id)?;
    info!(sitemap = id, files = removed, "Removed sitemap");
    Ok(removed)
}

pub fn print_sitemaps(sitemaps: &[Sitemap]) {
    if sitemaps.is_empty() {
        println!("No sitemaps registered. Use 'sitemapper sitemap add' to register one.");
        return;
    }

    println!(
        "{:<18} {:>7} {:>9} {:>10}  {:<24} CONTEXT",
        "ID", "CHUNKS", "LINKS", "MAX SIZE", "UPDATED"
    );
    for sitemap in sitemaps {
        let context = if sitemap.context.is_empty() {
            "(default)".to_string()
        } else {
            sitemap
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:<18} {:>7} {:>9} {:>10}  {:<24} {}",
            sitemap.id,
            sitemap.chunks,
            sitemap.links,
            sitemap.max_filesize,
            display_timestamp(sitemap.updated),
            context
        );
    }
}
