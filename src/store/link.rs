//! Link, sitemap and batch run records

use crate::error::{Error, Result};
use crate::{DEFAULT_PRIORITY, LANGUAGE_NONE};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// One indexable resource as it appears in the sitemap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub link_type: String,
    pub id: i64,
    pub subtype: String,
    /// Canonical internal path, before alias substitution
    pub loc: String,
    pub language: String,
    /// Viewable by an anonymous visitor
    pub access: bool,
    /// Included in the sitemap
    pub status: bool,
    pub status_override: bool,
    pub lastmod: i64,
    pub priority: f64,
    pub priority_override: bool,
    /// Observed change interval in seconds
    pub changefreq: i64,
    pub changecount: i64,
    /// Collaborator-defined metadata
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Link {
    pub fn new(link_type: impl Into<String>, id: i64, loc: impl Into<String>) -> Self {
        Self {
            link_type: link_type.into(),
            id,
            subtype: String::new(),
            loc: loc.into(),
            language: LANGUAGE_NONE.to_string(),
            access: true,
            status: true,
            status_override: false,
            lastmod: 0,
            priority: DEFAULT_PRIORITY,
            priority_override: false,
            changefreq: 0,
            changecount: 0,
            extra: BTreeMap::new(),
        }
    }

    /// A link is emitted only when it is both accessible and included
    pub fn is_visible(&self) -> bool {
        self.access && self.status
    }

    /// Record a new content modification time.
    ///
    /// Returns `true` when `lastmod` actually moved. The change counter is bumped and the
    /// observed interval is folded into `changefreq` as a running average.
    pub fn record_modification(&mut self, lastmod: i64) -> bool {
        if lastmod == self.lastmod {
            return false;
        }

        if self.lastmod > 0 && lastmod > self.lastmod {
            let interval = lastmod - self.lastmod;
            let previous = self.changecount.max(0);
            self.changefreq = if previous == 0 || self.changefreq == 0 {
                interval
            } else {
                (self.changefreq * previous + interval) / (previous + 1)
            };
            self.changecount = previous + 1;
        }

        self.lastmod = lastmod;
        true
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct LinkRow {
    link_type: String,
    id: i64,
    subtype: String,
    loc: String,
    language: String,
    access: bool,
    status: bool,
    status_override: bool,
    lastmod: i64,
    priority: f64,
    priority_override: bool,
    changefreq: i64,
    changecount: i64,
    extra_json: Option<String>,
}

impl TryFrom<LinkRow> for Link {
    type Error = Error;

    fn try_from(row: LinkRow) -> Result<Self> {
        let extra = match row.extra_json.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => BTreeMap::new(),
        };
        Ok(Self {
            link_type: row.link_type,
            id: row.id,
            subtype: row.subtype,
            loc: row.loc,
            language: row.language,
            access: row.access,
            status: row.status,
            status_override: row.status_override,
            lastmod: row.lastmod,
            priority: row.priority,
            priority_override: row.priority_override,
            changefreq: row.changefreq,
            changecount: row.changecount,
            extra,
        })
    }
}

/// Row filter for bulk link operations. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkConditions {
    pub link_type: Option<String>,
    pub link_types: Option<Vec<String>>,
    pub id: Option<i64>,
    pub ids: Option<Vec<i64>>,
    pub subtype: Option<String>,
    pub language: Option<String>,
    pub access: Option<bool>,
    pub status: Option<bool>,
    pub status_override: Option<bool>,
    pub priority_override: Option<bool>,
}

impl LinkConditions {
    pub fn for_type(link_type: impl Into<String>) -> Self {
        Self {
            link_type: Some(link_type.into()),
            ..Default::default()
        }
    }

    pub fn for_link(link_type: impl Into<String>, id: i64) -> Self {
        Self {
            link_type: Some(link_type.into()),
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn for_types(link_types: Vec<String>) -> Self {
        Self {
            link_types: Some(link_types),
            ..Default::default()
        }
    }
}

/// Field assignments for bulk link updates. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkUpdates {
    pub subtype: Option<String>,
    pub loc: Option<String>,
    pub language: Option<String>,
    pub access: Option<bool>,
    pub status: Option<bool>,
    pub status_override: Option<bool>,
    pub priority: Option<f64>,
    pub priority_override: Option<bool>,
    pub changefreq: Option<i64>,
    pub lastmod: Option<i64>,
}

impl LinkUpdates {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How a save landed in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
}

/// Callbacks run before a link is written.
///
/// `presave` may adjust the link; `on_insert`/`on_update` are chosen by whether a row with
/// the same key already existed.
pub trait LinkHook: Send + Sync {
    fn presave(&self, _link: &mut Link) {}

    fn on_insert(&self, _link: &Link) {}

    fn on_update(&self, _link: &Link, _original: &Link) {}
}

/// One logical sitemap, selected by its context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sitemap {
    pub id: String,
    pub context: BTreeMap<String, String>,
    pub chunks: i64,
    pub links: i64,
    pub max_filesize: i64,
    pub updated: i64,
}

impl Sitemap {
    pub fn new(context: BTreeMap<String, String>) -> Self {
        Self {
            id: Self::context_id(&context),
            context,
            chunks: 0,
            links: 0,
            max_filesize: 0,
            updated: 0,
        }
    }

    /// Sitemap restricted to one language (plus language-neutral links)
    pub fn for_language(language: &str) -> Self {
        let mut context = BTreeMap::new();
        context.insert("language".to_string(), language.to_string());
        Self::new(context)
    }

    /// Stable identifier derived from the context entries
    pub fn context_id(context: &BTreeMap<String, String>) -> String {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in context {
            hasher.update(key.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex()[..16].to_string()
    }

    /// Language this sitemap is restricted to, if any
    pub fn language(&self) -> Option<&str> {
        self.context.get("language").map(String::as_str)
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SitemapRow {
    id: String,
    context_json: String,
    chunks: i64,
    links: i64,
    max_filesize: i64,
    updated: i64,
}

impl TryFrom<SitemapRow> for Sitemap {
    type Error = Error;

    fn try_from(row: SitemapRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            context: serde_json::from_str(&row.context_json)?,
            chunks: row.chunks,
            links: row.links,
            max_filesize: row.max_filesize,
            updated: row.updated,
        })
    }
}

/// Batch run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

/// Kind of batch a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOperation {
    Regenerate,
    Rebuild,
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOperation::Regenerate => write!(f, "regenerate"),
            RunOperation::Rebuild => write!(f, "rebuild"),
        }
    }
}

impl FromStr for RunOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "regenerate" => Ok(RunOperation::Regenerate),
            "rebuild" => Ok(RunOperation::Rebuild),
            _ => Err(Error::Config(format!("Unknown run operation: {}", s))),
        }
    }
}

/// A batch run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: String,
    pub operation: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub items_processed: i64,
    pub summary: Option<String>,
}

impl BatchRun {
    pub fn new(operation: RunOperation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            items_processed: 0,
            summary: None,
        }
    }
}
