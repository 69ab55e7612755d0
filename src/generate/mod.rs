//! Sitemap chunk and index generation
//!
//! A chunk is one page of visible links for a sitemap context, written as a `<urlset>`.
//! The index lists every chunk of a sitemap once generation has finished.

mod freq;

pub use freq::*;

use crate::alias::{AliasCache, AliasProvider};
use crate::config::{Config, GenerateConfig};
use crate::error::{Error, Result};
use crate::output::OutputLayout;
use crate::store::{Link, LinkStore, Sitemap};
use crate::writer::{ElementContent, RootElement, SitemapWriter, WriterOptions};
use crate::{DEFAULT_PRIORITY, LANGUAGE_NONE};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of writing one chunk file
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub path: PathBuf,
    /// Links written after de-duplication
    pub links: usize,
    pub filesize: u64,
}

/// Format a Unix timestamp with a chrono format string
pub fn format_timestamp(timestamp: i64, format: &str) -> Result<String> {
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| Error::Other(format!("Timestamp out of range: {}", timestamp)))?;
    let mut out = String::new();
    write!(out, "{}", datetime.format(format))
        .map_err(|_| Error::Config(format!("Invalid lastmod format: {}", format)))?;
    Ok(out)
}

/// Join a site-relative path onto the base URL
pub fn absolute_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Public URL of one chunk, with the sitemap context in its query
pub fn chunk_url(base: &str, sitemap: &Sitemap, page: i64) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&sitemap.context)
        .append_pair("page", &page.to_string())
        .finish();
    format!("{}/sitemap.xml?{}", base, query)
}

/// Writes sitemap chunks and indexes
pub struct Generator {
    settings: GenerateConfig,
    store: LinkStore,
    aliases: Arc<dyn AliasProvider>,
    cache: AliasCache,
    layout: OutputLayout,
    writer_options: WriterOptions,
    fixed_now: Option<i64>,
}

impl Generator {
    /// Generator resolving aliases from the link store itself
    pub fn new(config: &Config, store: LinkStore) -> Self {
        let aliases: Arc<dyn AliasProvider> = Arc::new(store.clone());
        Self::with_alias_provider(config, store, aliases)
    }

    pub fn with_alias_provider(
        config: &Config,
        store: LinkStore,
        aliases: Arc<dyn AliasProvider>,
    ) -> Self {
        Self {
            settings: config.generate.clone(),
            store,
            aliases,
            cache: AliasCache::new(config.generate.prefetch_aliases),
            layout: OutputLayout::new(&config.paths.output_dir),
            writer_options: WriterOptions::from_config(&config.generate),
            fixed_now: None,
        }
    }

    /// Pin the generation clock
    pub fn with_now(mut self, now: i64) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub fn now(&self) -> i64 {
        self.fixed_now.unwrap_or_else(|| Utc::now().timestamp())
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn store(&self) -> &LinkStore {
        &self.store
    }

    pub fn alias_provider(&self) -> &dyn AliasProvider {
        self.aliases.as_ref()
    }

    /// Language a link is presented in
    fn display_language(&self, link: &Link, sitemap: &Sitemap) -> String {
        if link.language != LANGUAGE_NONE {
            return link.language.clone();
        }
        match sitemap.language() {
            Some(language) if language != LANGUAGE_NONE => language.to_string(),
            _ => self.settings.default_language.clone(),
        }
    }

    fn url_children(&self, link: &Link, url: String, now: i64) -> Result<Vec<(String, String)>> {
        let mut children = vec![("loc".to_string(), url)];

        if link.lastmod > 0 {
            children.push((
                "lastmod".to_string(),
                format_timestamp(link.lastmod, &self.settings.lastmod_format)?,
            ));
        }

        // A link that never recorded a change interval still ages from its lastmod
        let interval = if link.lastmod > 0 {
            decayed_changefreq(now, link.lastmod, link.changefreq)
        } else {
            link.changefreq
        };
        if interval > 0 {
            children.push((
                "changefreq".to_string(),
                ChangeFreq::from_interval(interval).to_string(),
            ));
        }

        if (link.priority - DEFAULT_PRIORITY).abs() > f64::EPSILON {
            children.push(("priority".to_string(), format!("{:.1}", link.priority)));
        }

        Ok(children)
    }

    /// Write chunk `chunk` (1-based) of `sitemap` into `writer`.
    ///
    /// Returns the number of links written. A link whose final URL equals the one written
    /// just before it is skipped.
    pub async fn generate_chunk(
        &mut self,
        sitemap: &Sitemap,
        writer: &mut SitemapWriter,
        chunk: i64,
    ) -> Result<usize> {
        let limit = self.settings.chunk_size as i64;
        let offset = (chunk - 1).max(0) * limit;
        let links = self.store.visible_page(sitemap, offset, limit).await?;
        let now = self.now();

        let mut last_url: Option<String> = None;
        let mut written = 0;

        for link in &links {
            let language = self.display_language(link, sitemap);
            let path = if self.settings.resolve_aliases {
                self.cache
                    .resolve(self.aliases.as_ref(), &link.loc, &language)
                    .await?
            } else {
                link.loc.clone()
            };
            let url = absolute_url(&self.settings.base_url, &path);

            if last_url.as_deref() == Some(url.as_str()) {
                debug!(url = %url, "Skipping duplicate location");
                continue;
            }

            let children = self.url_children(link, url.clone(), now)?;
            writer.write_element("url", &ElementContent::Children(children))?;
            last_url = Some(url);
            written += 1;
        }

        debug!(
            sitemap = %sitemap.id,
            chunk,
            fetched = links.len(),
            written,
            "Generated chunk"
        );
        Ok(written)
    }

    /// Write chunk `chunk` of `sitemap` to its file in the output layout
    pub async fn generate_page(&mut self, sitemap: &Sitemap, chunk: i64) -> Result<PageResult> {
        let path = self.layout.chunk_path(&sitemap.id, chunk);
        let mut writer =
            SitemapWriter::create(&path, RootElement::UrlSet, self.writer_options.clone())?;
        writer.start_document()?;

        let links = match self.generate_chunk(sitemap, &mut writer, chunk).await {
            Ok(links) => links,
            Err(e) => {
                if let Err(cleanup) = writer.abandon() {
                    warn!("Failed to remove partial chunk {:?}: {}", path, cleanup);
                }
                return Err(e);
            }
        };

        let filesize = writer.end_document()?;
        Ok(PageResult {
            path,
            links,
            filesize,
        })
    }

    /// Write the index for a sitemap with `sitemap.chunks` chunks.
    ///
    /// Every entry carries the generation time as its `lastmod`.
    pub async fn generate_index(&self, sitemap: &Sitemap) -> Result<u64> {
        let path = self.layout.index_path(&sitemap.id);
        let mut writer =
            SitemapWriter::create(&path, RootElement::SitemapIndex, self.writer_options.clone())?;
        writer.start_document()?;

        let lastmod = format_timestamp(self.now(), &self.settings.lastmod_format)?;
        let base = self.settings.base_url.trim_end_matches('/');
        for page in 1..=sitemap.chunks {
            let children = vec![
                ("loc".to_string(), chunk_url(base, sitemap, page)),
                ("lastmod".to_string(), lastmod.clone()),
            ];
            writer.write_element("sitemap", &ElementContent::Children(children))?;
        }

        let size = writer.end_document()?;
        debug!(sitemap = %sitemap.id, chunks = sitemap.chunks, "Generated index");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::setup_test_store;
    use std::fs;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    fn config(output: &TempDir, chunk_size: usize) -> Config {
        let mut config = Config::default();
        config.generate.base_url = "https://example.com/".to_string();
        config.generate.chunk_size = chunk_size;
        config.paths.output_dir = output.path().to_path_buf();
        config
    }

    async fn add(store: &LinkStore, id: i64, loc: &str) -> Link {
        let mut link = Link::new("node", id, loc);
        store.save(&mut link).await.unwrap();
        link
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            absolute_url("https://example.com/", "/node/1"),
            "https://example.com/node/1"
        );
        assert_eq!(absolute_url("https://example.com", ""), "https://example.com/");
        assert_eq!(
            absolute_url("https://example.com", "https://cdn.example.com/x"),
            "https://cdn.example.com/x"
        );
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(
            format_timestamp(0, "%Y-%m-%dT%H:%M:%SZ").unwrap(),
            "1970-01-01T00:00:00Z"
        );
        assert_eq!(format_timestamp(86_400, "%Y-%m-%d").unwrap(), "1970-01-02");
    }

    #[tokio::test]
    async fn test_chunk_elements() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();

        let mut plain = Link::new("node", 1, "a");
        store.save(&mut plain).await.unwrap();

        let mut rich = Link::new("node", 2, "b");
        rich.priority = 0.7;
        rich.lastmod = NOW - 3_600;
        rich.changefreq = ChangeFreq::HOURLY;
        store.save(&mut rich).await.unwrap();

        let mut generator = Generator::new(&config(&out, 10), store).with_now(NOW);
        let sitemap = Sitemap::new(Default::default());
        let page = generator.generate_page(&sitemap, 1).await.unwrap();
        assert_eq!(page.links, 2);

        let xml = fs::read_to_string(&page.path).unwrap();
        assert!(xml.contains("<loc>https://example.com/a</loc>"));
        assert!(xml.contains("<loc>https://example.com/b</loc>"));
        // Default priority is omitted, others keep one decimal
        assert_eq!(xml.matches("<priority>").count(), 1);
        assert!(xml.contains("<priority>0.7</priority>"));
        assert_eq!(xml.matches("<lastmod>").count(), 1);
        assert!(xml.contains("<lastmod>2023-11-14T21:13:20Z</lastmod>"));
        assert!(xml.contains("<changefreq>hourly</changefreq>"));
        assert_eq!(xml.matches("<changefreq>").count(), 1);
        assert_eq!(page.filesize, xml.len() as u64);
    }

    #[tokio::test]
    async fn test_stale_page_changefreq_decays() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();

        let mut link = Link::new("node", 1, "old");
        link.lastmod = NOW - 2 * 365 * 86_400;
        link.changefreq = ChangeFreq::DAILY;
        store.save(&mut link).await.unwrap();

        let mut generator = Generator::new(&config(&out, 10), store).with_now(NOW);
        let page = generator
            .generate_page(&Sitemap::new(Default::default()), 1)
            .await
            .unwrap();
        let xml = fs::read_to_string(&page.path).unwrap();
        assert!(xml.contains("<changefreq>never</changefreq>"));
    }

    #[tokio::test]
    async fn test_changefreq_without_recorded_interval() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();

        let mut link = Link::new("node", 1, "untouched");
        link.lastmod = NOW - 2 * 365 * 86_400;
        store.save(&mut link).await.unwrap();
        assert_eq!(link.changefreq, 0);

        let mut generator = Generator::new(&config(&out, 10), store).with_now(NOW);
        let page = generator
            .generate_page(&Sitemap::new(Default::default()), 1)
            .await
            .unwrap();
        let xml = fs::read_to_string(&page.path).unwrap();
        assert!(xml.contains("<changefreq>never</changefreq>"));
    }

    #[tokio::test]
    async fn test_adjacent_duplicates_are_skipped() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        add(&store, 1, "about").await;
        add(&store, 2, "node/2").await;
        add(&store, 3, "zebra").await;
        store.save_alias("node/2", "about", "und").await.unwrap();

        let mut generator = Generator::new(&config(&out, 10), store).with_now(NOW);
        let page = generator
            .generate_page(&Sitemap::new(Default::default()), 1)
            .await
            .unwrap();
        assert_eq!(page.links, 2);

        let xml = fs::read_to_string(&page.path).unwrap();
        assert_eq!(xml.matches("<loc>https://example.com/about</loc>").count(), 1);
        assert!(xml.contains("<loc>https://example.com/zebra</loc>"));
    }

    #[tokio::test]
    async fn test_language_specific_alias() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        add(&store, 1, "node/1").await;
        store.save_alias("node/1", "about", "und").await.unwrap();
        store.save_alias("node/1", "a-propos", "fr").await.unwrap();

        let mut generator = Generator::new(&config(&out, 10), store.clone()).with_now(NOW);
        let page = generator
            .generate_page(&Sitemap::for_language("fr"), 1)
            .await
            .unwrap();
        let xml = fs::read_to_string(&page.path).unwrap();
        assert!(xml.contains("<loc>https://example.com/a-propos</loc>"));

        let mut cfg = config(&out, 10);
        cfg.generate.resolve_aliases = false;
        let mut generator = Generator::new(&cfg, store).with_now(NOW);
        let page = generator
            .generate_page(&Sitemap::new(Default::default()), 1)
            .await
            .unwrap();
        let xml = fs::read_to_string(&page.path).unwrap();
        assert!(xml.contains("<loc>https://example.com/node/1</loc>"));
    }

    #[tokio::test]
    async fn test_chunk_boundary() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        for id in 1..=4 {
            add(&store, id, &format!("page-{}", id)).await;
        }

        let mut generator = Generator::new(&config(&out, 2), store).with_now(NOW);
        let sitemap = Sitemap::new(Default::default());
        assert_eq!(generator.generate_page(&sitemap, 1).await.unwrap().links, 2);
        let second = generator.generate_page(&sitemap, 2).await.unwrap();
        assert_eq!(second.links, 2);
        let xml = fs::read_to_string(&second.path).unwrap();
        assert!(xml.contains("page-3"));
        assert!(xml.contains("page-4"));

        let trailing = generator.generate_page(&sitemap, 3).await.unwrap();
        assert_eq!(trailing.links, 0);
        assert!(fs::read_to_string(&trailing.path).unwrap().contains("<urlset"));
    }

    #[test]
    fn test_chunk_url_carries_context() {
        let base = "https://example.com";
        assert_eq!(
            chunk_url(base, &Sitemap::new(Default::default()), 2),
            "https://example.com/sitemap.xml?page=2"
        );
        assert_eq!(
            chunk_url(base, &Sitemap::for_language("fr"), 2),
            "https://example.com/sitemap.xml?language=fr&page=2"
        );
    }

    #[tokio::test]
    async fn test_language_indexes_differ() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        let generator = Generator::new(&config(&out, 2), store).with_now(NOW);

        let mut french = Sitemap::for_language("fr");
        french.chunks = 2;
        let mut german = Sitemap::for_language("de");
        german.chunks = 2;
        generator.generate_index(&french).await.unwrap();
        generator.generate_index(&german).await.unwrap();

        let fr = fs::read_to_string(generator.layout().index_path(&french.id)).unwrap();
        let de = fs::read_to_string(generator.layout().index_path(&german.id)).unwrap();
        assert_ne!(fr, de);
        assert!(fr.contains("<loc>https://example.com/sitemap.xml?language=fr&amp;page=2</loc>"));
        assert!(de.contains("<loc>https://example.com/sitemap.xml?language=de&amp;page=1</loc>"));
    }

    #[tokio::test]
    async fn test_index_lists_every_chunk() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        let generator = Generator::new(&config(&out, 2), store).with_now(NOW);

        let mut sitemap = Sitemap::new(Default::default());
        sitemap.chunks = 3;
        generator.generate_index(&sitemap).await.unwrap();

        let xml = fs::read_to_string(generator.layout().index_path(&sitemap.id)).unwrap();
        assert!(xml.contains("<sitemapindex"));
        assert_eq!(xml.matches("<sitemap>").count(), 3);
        assert!(xml.contains("<loc>https://example.com/sitemap.xml?page=3</loc>"));
        assert_eq!(
            xml.matches("<lastmod>2023-11-14T22:13:20Z</lastmod>").count(),
            3
        );
    }
}
