//! sitemapper CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use sitemapper::{
    commands::{
        cmd_add_sitemap, cmd_delete_link, cmd_init, cmd_list_sitemaps, cmd_rebuild,
        cmd_regenerate, cmd_remove_sitemap, cmd_set_alias, cmd_set_link, cmd_status, open_store,
        print_init, print_link, print_rebuild_stats, print_regenerate_stats, print_sitemaps,
        print_status, InitOptions, LinkEdit, RebuildCommandOptions, RegenerateOptions,
    },
    config::Config,
    error::Result,
    progress::LogWriterFactory,
    store::LinkStore,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sitemapper")]
#[command(version, about = "Chunked, resumable XML sitemap generation", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize sitemapper configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show link, sitemap and regeneration status
    Status,

    /// Manage sitemaps
    Sitemap {
        #[command(subcommand)]
        action: SitemapAction,
    },

    /// Edit links by hand
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },

    /// Manage URL aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },

    /// Write sitemap chunk and index files
    Regenerate {
        /// Only regenerate these sitemap IDs
        #[arg(long = "sitemap")]
        sitemaps: Vec<String>,

        /// Regenerate even if no link changed
        #[arg(long)]
        force: bool,

        /// Continue an interrupted regeneration
        #[arg(long)]
        resume: bool,
    },

    /// Resynchronize links from a resource file
    Rebuild {
        /// JSON file of resources keyed by link type
        #[arg(long)]
        source: PathBuf,

        /// Only rebuild these link types
        #[arg(long = "type")]
        types: Vec<String>,

        /// Delete existing links of the rebuilt types first
        #[arg(long)]
        clear: bool,

        /// Clear, but keep links with pinned status or priority
        #[arg(long)]
        keep_custom: bool,

        /// Continue an interrupted rebuild
        #[arg(long)]
        resume: bool,

        /// Skip sitemap regeneration afterwards
        #[arg(long)]
        no_regenerate: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SitemapAction {
    /// Register a sitemap for a context (e.g. language=fr)
    Add {
        /// Context entries as key=value
        context: Vec<String>,
    },

    /// List registered sitemaps
    List {
        /// Output only sitemap IDs (one per line, for scripting)
        #[arg(long)]
        ids_only: bool,
    },

    /// Remove a sitemap and its files
    Remove {
        /// Sitemap ID (use 'sitemapper sitemap list' to list)
        sitemap_id: String,
    },
}

#[derive(Subcommand)]
enum LinkAction {
    /// Create or update a link
    Set {
        link_type: String,
        id: i64,

        /// Path or URL of the link
        #[arg(long)]
        loc: Option<String>,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        subtype: Option<String>,

        /// Last modification as a Unix timestamp
        #[arg(long)]
        lastmod: Option<i64>,

        /// Pin the link as included
        #[arg(long, conflicts_with = "exclude")]
        include: bool,

        /// Pin the link as excluded
        #[arg(long)]
        exclude: bool,

        /// Pin the priority (0.0 - 1.0)
        #[arg(long)]
        priority: Option<f64>,

        /// Return status and priority to the configured defaults
        #[arg(long)]
        reset: bool,
    },

    /// Delete a link
    Delete { link_type: String, id: i64 },
}

#[derive(Subcommand)]
enum AliasAction {
    /// Map a source path to its public alias
    Set {
        source: String,
        alias: String,

        #[arg(long)]
        language: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        let report = cmd_init(InitOptions {
            base_dir: base_dir_for(cli.config.as_deref()),
            force,
        })
        .await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_init(&report);
        }
        return Ok(());
    }

    // Handle completions command (doesn't need config/db)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "sitemapper", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&config).await?;
    let progress = !cli.json && std::io::stderr().is_terminal();

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Status => {
            let status = cmd_status(&config, &store).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Sitemap { action } => {
            handle_sitemap_action(&config, &store, action, cli.json).await?;
        }

        Commands::Link { action } => {
            handle_link_action(&store, action, cli.json).await?;
        }

        Commands::Alias { action } => match action {
            AliasAction::Set {
                source,
                alias,
                language,
            } => {
                cmd_set_alias(&store, &source, &alias, language.as_deref()).await?;
                if cli.json {
                    println!(r#"{{"status": "ok"}}"#);
                } else {
                    println!("✓ Alias saved: {} -> {}", source, alias);
                }
            }
        },

        Commands::Regenerate {
            sitemaps,
            force,
            resume,
        } => {
            let options = RegenerateOptions {
                sitemap_ids: sitemaps,
                force,
                resume,
                progress,
            };

            let stats = cmd_regenerate(&config, &store, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_regenerate_stats(&stats);
            }
        }

        Commands::Rebuild {
            source,
            types,
            clear,
            keep_custom,
            resume,
            no_regenerate,
        } => {
            let options = RebuildCommandOptions {
                source,
                link_types: types,
                clear,
                keep_custom,
                resume,
                regenerate: !no_regenerate,
                progress,
            };

            let stats = cmd_rebuild(&config, &store, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_rebuild_stats(&stats);
            }
        }
    }

    Ok(())
}

/// Base directory for `init`: the parent of a given .toml file, a given directory, or the default
fn base_dir_for(path: Option<&Path>) -> PathBuf {
    match path {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir),
        Some(path) => path.to_path_buf(),
        None => Config::default_base_dir(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => path.to_path_buf(),
        Some(path) => path.join("config.toml"),
        None => Config::default_config_path(),
    };

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'sitemapper init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}

async fn handle_sitemap_action(
    config: &Config,
    store: &LinkStore,
    action: SitemapAction,
    json: bool,
) -> Result<()> {
    match action {
        SitemapAction::Add { context } => {
            let sitemap = cmd_add_sitemap(store, &context).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sitemap)?);
            } else {
                println!("✓ Sitemap {} registered", sitemap.id);
            }
        }
        SitemapAction::List { ids_only } => {
            let sitemaps = cmd_list_sitemaps(store).await?;
            if ids_only {
                for sitemap in &sitemaps {
                    println!("{}", sitemap.id);
                }
            } else if json {
                println!("{}", serde_json::to_string_pretty(&sitemaps)?);
            } else {
                print_sitemaps(&sitemaps);
            }
        }
        SitemapAction::Remove { sitemap_id } => {
            let removed = cmd_remove_sitemap(config, store, &sitemap_id).await?;
            if json {
                println!(r#"{{"status": "ok", "files_removed": {}}}"#, removed);
            } else {
                println!("✓ Sitemap '{}' removed ({} files)", sitemap_id, removed);
            }
        }
    }

    Ok(())
}

async fn handle_link_action(store: &LinkStore, action: LinkAction, json: bool) -> Result<()> {
    match action {
        LinkAction::Set {
            link_type,
            id,
            loc,
            language,
            subtype,
            lastmod,
            include,
            exclude,
            priority,
            reset,
        } => {
            let status = match (include, exclude) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let edit = LinkEdit {
                loc,
                language,
                subtype,
                lastmod,
                status,
                priority,
                reset_overrides: reset,
            };
            let (link, outcome) = cmd_set_link(store, &link_type, id, edit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&link)?);
            } else {
                print_link(&link, outcome);
            }
        }
        LinkAction::Delete { link_type, id } => {
            cmd_delete_link(store, &link_type, id).await?;
            if json {
                println!(r#"{{"status": "ok"}}"#);
            } else {
                println!("✓ Link {}:{} deleted", link_type, id);
            }
        }
    }

    Ok(())
}
