//! Rebuild command implementation

use super::regenerate::{cmd_regenerate, RegenerateOptions, RegenerateStats};
use crate::batch::{
    run_batch_with_checkpoint, BatchCheckpoint, BatchObserver, CheckpointFile, LogObserver,
    RebuildBatch, RebuildOptions,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::ProgressObserver;
use crate::provider::{JsonResourceProvider, ResourceProvider};
use crate::store::LinkStore;
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RebuildCommandOptions {
    /// JSON file of resources keyed by link type
    pub source: PathBuf,
    /// Link types to rebuild; empty means every type in the source
    pub link_types: Vec<String>,
    /// Delete existing links of the rebuilt types first
    pub clear: bool,
    /// When clearing, keep links with pinned status or priority
    pub keep_custom: bool,
    pub resume: bool,
    /// Regenerate sitemaps after a successful rebuild
    pub regenerate: bool,
    pub progress: bool,
}

/// Rebuild result
#[derive(Debug, Clone, Serialize)]
pub struct RebuildStats {
    pub steps: usize,
    pub summary: String,
    pub aliases_imported: usize,
    pub regenerate: Option<RegenerateStats>,
}

/// Load resources from the source file
pub fn load_providers(source: &Path) -> anyhow::Result<Vec<JsonResourceProvider>> {
    let providers = JsonResourceProvider::from_file(source)
        .with_context(|| format!("Failed to read resources from {}", source.display()))?;
    Ok(providers)
}

/// Replace the aliases of every resource that declares one
async fn import_aliases(store: &LinkStore, providers: &[JsonResourceProvider]) -> Result<usize> {
    let mut imported = 0;
    for provider in providers {
        for resource in provider.resources() {
            let Some(alias) = &resource.alias else {
                continue;
            };
            store.delete_aliases(&resource.loc, &resource.language).await?;
            store
                .save_alias(&resource.loc, alias, &resource.language)
                .await?;
            imported += 1;
        }
    }
    if imported > 0 {
        info!(aliases = imported, "Imported aliases");
    }
    Ok(imported)
}

/// Resynchronize links from a resource file
pub async fn cmd_rebuild(
    config: &Config,
    store: &LinkStore,
    options: RebuildCommandOptions,
) -> Result<RebuildStats> {
    let providers = load_providers(&options.source)?;
    let aliases_imported = import_aliases(store, &providers).await?;
    let boxed: Vec<Box<dyn ResourceProvider>> = providers
        .into_iter()
        .map(|p| Box::new(p) as Box<dyn ResourceProvider>)
        .collect();

    let checkpoint = CheckpointFile::new(&config.paths.checkpoint_file);
    let mut batch = match checkpoint.load()? {
        Some(BatchCheckpoint::Rebuild(state)) if options.resume => {
            info!(position = state.position, "Resuming rebuild");
            RebuildBatch::resume(config, store.clone(), boxed, state)
        }
        Some(other) if options.resume => {
            return Err(Error::Batch(format!(
                "Checkpoint holds an unfinished {} batch, not a rebuild",
                other.operation()
            )));
        }
        None if options.resume => {
            return Err(Error::Batch("No unfinished rebuild to resume".to_string()));
        }
        existing => {
            if let Some(other) = existing {
                warn!("Discarding unfinished {} checkpoint", other.operation());
            }
            let rebuild_options = RebuildOptions {
                clear: options.clear || options.keep_custom,
                keep_custom: options.keep_custom,
            };
            RebuildBatch::new(
                config,
                store.clone(),
                boxed,
                options.link_types,
                rebuild_options,
            )
        }
    };

    let mut observer: Box<dyn BatchObserver> = if options.progress {
        Box::new(ProgressObserver::new("rebuild"))
    } else {
        Box::new(LogObserver)
    };
    let outcome = run_batch_with_checkpoint(&mut batch, observer.as_mut(), Some(&checkpoint)).await;
    if !outcome.success {
        return Err(Error::Batch(format!(
            "Rebuild failed: {} (resume with --resume)",
            outcome.summary
        )));
    }

    let regenerate = if options.regenerate {
        let regenerate_options = RegenerateOptions {
            progress: options.progress,
            ..Default::default()
        };
        Some(cmd_regenerate(config, store, regenerate_options).await?)
    } else {
        None
    };

    Ok(RebuildStats {
        steps: outcome.steps,
        summary: outcome.summary,
        aliases_imported,
        regenerate,
    })
}

pub fn print_rebuild_stats(stats: &RebuildStats) {
    println!("\n✓ Rebuild complete");
    println!("  {}", stats.summary);
    println!("  Aliases imported: {}", stats.aliases_imported);
    if let Some(regenerate) = &stats.regenerate {
        super::regenerate::print_regenerate_stats(regenerate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasProvider;
    use crate::store::test_support::setup_test_store;
    use crate::store::{LinkConditions, Sitemap};
    use std::fs;
    use tempfile::TempDir;

    const RESOURCES: &str = r#"{
        "node": [
            {"id": 1, "loc": "node/1", "alias": "about"},
            {"id": 2, "loc": "node/2", "lastmod": 1700000000},
            {"id": 3, "loc": "node/3", "viewable": false}
        ],
        "user": [{"id": 1, "loc": "user/1"}]
    }"#;

    fn setup(tmp: &TempDir) -> (Config, PathBuf) {
        let mut config = Config::default();
        config.generate.base_url = "https://example.com".to_string();
        config.generate.batch_limit = 2;
        config.paths.output_dir = tmp.path().join("out");
        config.paths.checkpoint_file = tmp.path().join("batch.json");
        let source = tmp.path().join("resources.json");
        fs::write(&source, RESOURCES).unwrap();
        (config, source)
    }

    #[tokio::test]
    async fn test_rebuild_then_regenerate() {
        let (store, _db) = setup_test_store().await;
        let tmp = TempDir::new().unwrap();
        let (config, source) = setup(&tmp);
        store.save_sitemap(&Sitemap::new(Default::default())).await.unwrap();

        let options = RebuildCommandOptions {
            source,
            regenerate: true,
            ..Default::default()
        };
        let stats = cmd_rebuild(&config, &store, options).await.unwrap();
        assert_eq!(stats.aliases_imported, 1);
        assert_eq!(stats.summary, "2 link types, 4 inserted, 0 updated");
        assert_eq!(store.count_aliases().await.unwrap(), 1);

        let regenerate = stats.regenerate.unwrap();
        assert!(!regenerate.skipped);
        // node/3 is not viewable
        assert_eq!(regenerate.sitemaps[0].links, 3);
        let chunk_path = tmp
            .path()
            .join("out")
            .join(&regenerate.sitemaps[0].id)
            .join("1.xml");
        let chunk = fs::read_to_string(chunk_path).unwrap();
        assert!(chunk.contains("https://example.com/about"));
    }

    #[tokio::test]
    async fn test_rebuild_selected_type() {
        let (store, _db) = setup_test_store().await;
        let tmp = TempDir::new().unwrap();
        let (config, source) = setup(&tmp);

        let options = RebuildCommandOptions {
            source,
            link_types: vec!["user".to_string()],
            ..Default::default()
        };
        cmd_rebuild(&config, &store, options).await.unwrap();
        assert_eq!(store.count(&LinkConditions::for_type("user")).await.unwrap(), 1);
        assert_eq!(store.count(&LinkConditions::for_type("node")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_names_file() {
        let (store, _db) = setup_test_store().await;
        let tmp = TempDir::new().unwrap();
        let (config, _) = setup(&tmp);
        let options = RebuildCommandOptions {
            source: tmp.path().join("absent.json"),
            ..Default::default()
        };
        let err = cmd_rebuild(&config, &store, options).await.unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
