//! Status command implementation

use super::display_timestamp;
use crate::config::Config;
use crate::error::Result;
use crate::store::{BatchRun, GlobalStats, LinkStore, Sitemap};
use serde::Serialize;
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub output_dir: String,
    pub base_url: String,
    pub regeneration_needed: bool,
    pub generated_last: Option<i64>,
    pub stats: GlobalStats,
    pub sitemaps: Vec<Sitemap>,
    pub recent_runs: Vec<BatchRun>,
}

/// Get system status
pub async fn cmd_status(config: &Config, store: &LinkStore) -> Result<StatusInfo> {
    info!("Getting status");

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        output_dir: config.paths.output_dir.display().to_string(),
        base_url: config.generate.base_url.clone(),
        regeneration_needed: store.is_regeneration_needed().await?,
        generated_last: store.generated_last().await?,
        stats: store.get_global_stats().await?,
        sitemaps: store.list_sitemaps().await?,
        recent_runs: store.list_runs(5).await?,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 sitemapper Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Output: {}", status.output_dir);
    println!("Base URL: {}", status.base_url);

    println!("\nRegeneration:");
    let needed = if status.regeneration_needed {
        "⚠ Needed (run 'sitemapper regenerate')"
    } else {
        "✓ Up to date"
    };
    println!("  Status: {}", needed);
    println!(
        "  Last generated: {}",
        display_timestamp(status.generated_last.unwrap_or(0))
    );

    println!("\nLinks:");
    println!("  Total: {}", status.stats.link_count);
    println!("  Visible: {}", status.stats.visible_count);
    println!("  Aliases: {}", status.stats.alias_count);
    for t in &status.stats.by_type {
        println!(
            "  {:<16} {:>8} total {:>8} visible",
            t.link_type, t.total_links, t.visible_links
        );
    }

    println!("\nSitemaps: {}", status.stats.sitemap_count);
    for sitemap in &status.sitemaps {
        println!(
            "  {}  chunks={} links={} updated={}",
            sitemap.id,
            sitemap.chunks,
            sitemap.links,
            display_timestamp(sitemap.updated)
        );
    }

    if !status.recent_runs.is_empty() {
        println!("\nRecent runs:");
        for run in &status.recent_runs {
            println!(
                "  {} {:<10} {:<9} {} items  {}",
                run.started_at,
                run.operation,
                run.status,
                run.items_processed,
                run.summary.as_deref().unwrap_or("")
            );
        }
    }
}
