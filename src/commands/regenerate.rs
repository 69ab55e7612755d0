//! Regenerate command implementation

use crate::batch::{
    run_batch_with_checkpoint, BatchCheckpoint, BatchObserver, CheckpointFile, LogObserver,
    Regenerator,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::ProgressObserver;
use crate::store::{LinkStore, Sitemap};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RegenerateOptions {
    /// Sitemaps to regenerate; empty means all
    pub sitemap_ids: Vec<String>,
    /// Ignore the change flag and minimum lifetime
    pub force: bool,
    /// Continue an interrupted run from its checkpoint
    pub resume: bool,
    /// Draw a progress bar
    pub progress: bool,
}

/// Regeneration result
#[derive(Debug, Clone, Serialize)]
pub struct RegenerateStats {
    pub skipped: bool,
    pub steps: usize,
    pub summary: String,
    pub regeneration_needed: bool,
    pub sitemaps: Vec<Sitemap>,
}

/// Regenerate sitemaps when links changed, or unconditionally with `force`
pub async fn cmd_regenerate(
    config: &Config,
    store: &LinkStore,
    options: RegenerateOptions,
) -> Result<RegenerateStats> {
    let regenerator = Regenerator::new(config, store.clone());
    let checkpoint = CheckpointFile::new(&config.paths.checkpoint_file);

    let mut batch = match checkpoint.load()? {
        Some(BatchCheckpoint::Regenerate(state)) if options.resume => {
            info!(position = state.position, "Resuming regeneration");
            regenerator.resume(state)
        }
        Some(other) if options.resume => {
            return Err(Error::Batch(format!(
                "Checkpoint holds an unfinished {} batch, not a regeneration",
                other.operation()
            )));
        }
        None if options.resume => {
            return Err(Error::Batch("No unfinished regeneration to resume".to_string()));
        }
        existing => {
            if let Some(other) = existing {
                warn!("Discarding unfinished {} checkpoint", other.operation());
            }
            if !options.force && !regenerator.needs_regeneration(Utc::now().timestamp()).await? {
                info!("Sitemaps are up to date");
                return Ok(RegenerateStats {
                    skipped: true,
                    steps: 0,
                    summary: "Sitemaps are up to date".to_string(),
                    regeneration_needed: store.is_regeneration_needed().await?,
                    sitemaps: store.list_sitemaps().await?,
                });
            }
            regenerator.run_batch(options.sitemap_ids)
        }
    };

    let mut observer: Box<dyn BatchObserver> = if options.progress {
        Box::new(ProgressObserver::new("regenerate"))
    } else {
        Box::new(LogObserver)
    };
    let outcome = run_batch_with_checkpoint(&mut batch, observer.as_mut(), Some(&checkpoint)).await;
    if !outcome.success {
        return Err(Error::Batch(format!(
            "Regeneration failed: {} (resume with --resume)",
            outcome.summary
        )));
    }

    Ok(RegenerateStats {
        skipped: false,
        steps: outcome.steps,
        summary: outcome.summary,
        regeneration_needed: store.is_regeneration_needed().await?,
        sitemaps: store.list_sitemaps().await?,
    })
}

pub fn print_regenerate_stats(stats: &RegenerateStats) {
    if stats.skipped {
        println!("✓ {} (use --force to regenerate anyway)", stats.summary);
        return;
    }
    println!("\n✓ Regeneration complete");
    println!("  {}", stats.summary);
    println!("  Steps: {}", stats.steps);
    for sitemap in &stats.sitemaps {
        println!(
            "  {}: {} chunks, {} links, largest file {} bytes",
            sitemap.id, sitemap.chunks, sitemap.links, sitemap.max_filesize
        );
    }
    if stats.regeneration_needed {
        println!("  ⚠ Links changed during the run; regenerate again to pick them up");
    }
}
