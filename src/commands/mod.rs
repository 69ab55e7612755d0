//! CLI commands implementation

pub mod init;
pub mod links;
pub mod rebuild;
pub mod regenerate;
pub mod sitemaps;
pub mod status;

pub use init::*;
pub use links::*;
pub use rebuild::*;
pub use regenerate::*;
pub use sitemaps::*;
pub use status::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::LinkStore;

/// Open the link store of an initialized installation
pub async fn open_store(config: &Config) -> Result<LinkStore> {
    if !config.paths.db_file.exists() {
        return Err(Error::NotInitialized);
    }
    let store = LinkStore::connect(config).await?;
    if !store.is_initialized().await? {
        return Err(Error::NotInitialized);
    }
    Ok(store)
}

/// Format a Unix timestamp for console output
pub(crate) fn display_timestamp(timestamp: i64) -> String {
    if timestamp <= 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
