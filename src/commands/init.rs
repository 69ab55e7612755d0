//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{LinkStore, Sitemap};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub force: bool,
}

/// What `init` created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub output_dir: String,
    pub default_sitemap: String,
}

/// Write the config, create the link database and register the default sitemap
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths(Some(options.base_dir));

    if config.paths.config_file.exists() && !options.force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.save()?;
    std::fs::create_dir_all(&config.paths.output_dir)?;

    let store = LinkStore::connect(&config).await?;
    store.init_schema().await?;
    let sitemap = Sitemap::new(Default::default());
    if store.get_sitemap(&sitemap.id).await?.is_none() {
        store.save_sitemap(&sitemap).await?;
        info!(sitemap = %sitemap.id, "Registered default sitemap");
    }

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        output_dir: config.paths.output_dir.display().to_string(),
        default_sitemap: sitemap.id,
    })
}

pub fn print_init(report: &InitReport) {
    println!("✓ sitemapper initialized successfully");
    println!("  Config: {}", report.config_path);
    println!("  Database: {}", report.db_path);
    println!("  Output: {}", report.output_dir);
    println!("  Default sitemap: {}", report.default_sitemap);
    println!("\nNext steps:");
    println!("  1. Set generate.base_url in the config file");
    println!("  2. Load links: sitemapper rebuild --source resources.json");
    println!("  3. Write sitemaps: sitemapper regenerate");
}
