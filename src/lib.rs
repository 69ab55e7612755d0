//! sitemapper - chunked, resumable XML sitemap generation
//!
//! Links are tracked in a SQLite store together with a change flag. A regeneration batch
//! turns the visible links of every sitemap context into chunk files of the sitemap
//! protocol, plus an index when a sitemap spans more than one chunk.

pub mod alias;
pub mod batch;
pub mod commands;
pub mod config;
pub mod error;
pub mod generate;
pub mod memory;
pub mod output;
pub mod progress;
pub mod provider;
pub mod store;
pub mod writer;

pub use config::Config;
pub use error::{Error, Result};

/// Language code of links that are not tied to a language
pub const LANGUAGE_NONE: &str = "und";

/// Priority assigned to links that do not set one
pub const DEFAULT_PRIORITY: f64 = 0.5;
