//! Custom error types for sitemapper

use thiserror::Error;

/// Main error type for sitemapper operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid priority {priority} for link {link_type}:{id} (must be between 0.0 and 1.0)")]
    InvalidPriority {
        link_type: String,
        id: i64,
        priority: f64,
    },

    #[error("Sitemap not found: {0}")]
    SitemapNotFound(String),

    #[error("Link not found: {link_type}:{id}")]
    LinkNotFound { link_type: String, id: i64 },

    #[error("No resource provider registered for link type '{0}'")]
    ProviderNotFound(String),

    #[error("Not initialized: run 'sitemapper init' first")]
    NotInitialized,

    #[error("Batch error: {0}")]
    Batch(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}

/// Result type alias for sitemapper
pub type Result<T> = std::result::Result<T, Error>;
