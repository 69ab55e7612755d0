//! URL alias resolution
//!
//! Internal paths (`node/42`) are replaced with their public aliases (`about-us`) when
//! locations are written. With prefetching enabled the language-neutral table is loaded
//! once per generator and a single language-specific table is kept, replaced whenever
//! the requested language changes. Since chunk rows are ordered by language this loads
//! each table at most once per chunk.

use crate::error::Result;
use crate::LANGUAGE_NONE;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Source of URL aliases
#[async_trait]
pub trait AliasProvider: Send + Sync {
    /// Every `source -> alias` mapping registered for exactly `language`
    async fn load_aliases(&self, language: &str) -> Result<HashMap<String, String>>;

    /// Alias for one path, preferring `language` over the language-neutral entry
    async fn lookup_alias(&self, path: &str, language: &str) -> Result<Option<String>>;

    /// Total number of aliases, used for memory estimation
    async fn count_aliases(&self) -> Result<u64>;
}

type AliasMap = HashMap<String, String>;

/// Per-generator alias cache
#[derive(Debug, Default)]
pub struct AliasCache {
    prefetch: bool,
    neutral: Option<AliasMap>,
    current: Option<(String, AliasMap)>,
}

impl AliasCache {
    pub fn new(prefetch: bool) -> Self {
        Self {
            prefetch,
            neutral: None,
            current: None,
        }
    }

    /// Public path for `path` in `language`, or `path` itself when no alias exists
    pub async fn resolve(
        &mut self,
        provider: &dyn AliasProvider,
        path: &str,
        language: &str,
    ) -> Result<String> {
        if !self.prefetch {
            return Ok(provider
                .lookup_alias(path, language)
                .await?
                .unwrap_or_else(|| path.to_string()));
        }

        if self.neutral.is_none() {
            let aliases = provider.load_aliases(LANGUAGE_NONE).await?;
            debug!("Loaded {} language-neutral aliases", aliases.len());
            self.neutral = Some(aliases);
        }

        if language != LANGUAGE_NONE {
            let stale = self
                .current
                .as_ref()
                .map_or(true, |(lang, _)| lang != language);
            if stale {
                let aliases = provider.load_aliases(language).await?;
                debug!("Loaded {} aliases for language {}", aliases.len(), language);
                self.current = Some((language.to_string(), aliases));
            }

            if let Some(alias) = self.current.as_ref().and_then(|(_, map)| map.get(path)) {
                return Ok(alias.clone());
            }
        }

        Ok(self
            .neutral
            .as_ref()
            .and_then(|map| map.get(path))
            .cloned()
            .unwrap_or_else(|| path.to_string()))
    }

    /// Language of the currently cached language-specific table
    pub fn cached_language(&self) -> Option<&str> {
        self.current.as_ref().map(|(lang, _)| lang.as_str())
    }
}
