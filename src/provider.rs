//! Resource providers feeding the link store
//!
//! A provider enumerates the resources of one link type in ascending id order. The
//! rebuild batch pages through it and maps each resource onto a link with
//! [`sync_resource`].

use crate::config::{Config, LinkTypeSettings};
use crate::error::{Error, Result};
use crate::store::{Link, LinkStore, SaveOutcome};
use crate::LANGUAGE_NONE;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

fn default_language() -> String {
    LANGUAGE_NONE.to_string()
}

fn default_viewable() -> bool {
    true
}

/// One candidate resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    #[serde(default)]
    pub subtype: String,
    pub loc: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub lastmod: i64,
    #[serde(default = "default_viewable")]
    pub viewable: bool,
    /// Public path, if the resource has one
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Enumerates resources of one link type
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    fn resource_type(&self) -> &str;

    /// Number of resources the provider will yield
    async fn count_candidates(&self) -> Result<u64>;

    /// Up to `limit` resources with id greater than `last_id`, ascending
    async fn fetch_after(&self, last_id: i64, limit: usize) -> Result<Vec<Resource>>;

    /// Whether an anonymous visitor may view the resource
    async fn is_viewable(&self, resource: &Resource) -> Result<bool>;

    async fn has_alias(&self, resource: &Resource) -> Result<bool>;
}

/// Provider over an in-memory list, typically loaded from JSON
#[derive(Debug, Clone)]
pub struct JsonResourceProvider {
    resource_type: String,
    resources: Vec<Resource>,
}

impl JsonResourceProvider {
    pub fn new(resource_type: impl Into<String>, mut resources: Vec<Resource>) -> Self {
        resources.sort_by_key(|r| r.id);
        resources.dedup_by_key(|r| r.id);
        Self {
            resource_type: resource_type.into(),
            resources,
        }
    }

    /// Parse `{"<link_type>": [resource, ...], ...}`
    pub fn from_json(json: &str) -> Result<Vec<Self>> {
        let by_type: BTreeMap<String, Vec<Resource>> = serde_json::from_str(json)?;
        Ok(by_type
            .into_iter()
            .map(|(link_type, resources)| Self::new(link_type, resources))
            .collect())
    }

    pub fn from_file(path: &Path) -> Result<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }
}

#[async_trait]
impl ResourceProvider for JsonResourceProvider {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    async fn count_candidates(&self) -> Result<u64> {
        Ok(self.resources.len() as u64)
    }

    async fn fetch_after(&self, last_id: i64, limit: usize) -> Result<Vec<Resource>> {
        Ok(self
            .resources
            .iter()
            .filter(|r| r.id > last_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn is_viewable(&self, resource: &Resource) -> Result<bool> {
        Ok(resource.viewable)
    }

    async fn has_alias(&self, resource: &Resource) -> Result<bool> {
        Ok(resource.alias.is_some())
    }
}

/// Inclusion defaults for a resource: `<type>:<subtype>` first, then `<type>`
pub fn settings_for(config: &Config, link_type: &str, subtype: &str) -> LinkTypeSettings {
    if !subtype.is_empty() {
        if let Some(settings) = config.link_types.get(&format!("{}:{}", link_type, subtype)) {
            return settings.clone();
        }
    }
    config.link_type(link_type)
}

/// Find the provider for a link type
pub fn find_provider<'a>(
    providers: &'a [Box<dyn ResourceProvider>],
    link_type: &str,
) -> Result<&'a dyn ResourceProvider> {
    providers
        .iter()
        .find(|p| p.resource_type() == link_type)
        .map(|p| p.as_ref())
        .ok_or_else(|| Error::ProviderNotFound(link_type.to_string()))
}

/// Map a resource onto its link and save it.
///
/// Location, language and metadata follow the resource. Status and priority take the
/// configured defaults unless an administrator override is set on the stored link.
pub async fn sync_resource(
    store: &LinkStore,
    config: &Config,
    provider: &dyn ResourceProvider,
    resource: &Resource,
) -> Result<SaveOutcome> {
    let link_type = provider.resource_type();
    let settings = settings_for(config, link_type, &resource.subtype);

    let mut link = store
        .load(link_type, resource.id)
        .await?
        .unwrap_or_else(|| Link::new(link_type, resource.id, resource.loc.clone()));

    link.subtype = resource.subtype.clone();
    link.loc = resource.loc.clone();
    link.language = resource.language.clone();
    link.extra = resource.extra.clone();
    link.access = provider.is_viewable(resource).await?;

    if !link.status_override {
        link.status = settings.status
            && (!settings.require_alias || provider.has_alias(resource).await?);
    }
    if !link.priority_override {
        link.priority = settings.priority;
    }

    if link.record_modification(resource.lastmod) {
        debug!(
            link_type,
            id = resource.id,
            changecount = link.changecount,
            "Resource modified"
        );
    }

    store.save(&mut link).await
}
