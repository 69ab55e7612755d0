//! Sitemap regeneration batch
//!
//! For every sitemap, chunks are generated one per step until a trailing chunk comes back
//! empty. The empty chunk fixes the chunk count. Once every sitemap is done, an index is
//! written for each sitemap with more than one chunk.

use super::{BatchCheckpoint, BatchJob, StepReport};
use crate::alias::AliasProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::generate::Generator;
use crate::memory::{MemoryAdjustment, MemoryGovernor};
use crate::output::remove_with_gzip;
use crate::store::{BatchRun, LinkStore, RunOperation, RunStatus, Sitemap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Position within the sitemap currently being generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapCursor {
    pub sitemap_id: String,
    /// Next chunk to generate (1-based)
    pub chunk: i64,
    pub links: i64,
    pub max_expected: i64,
    pub max_filesize: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegeneratePhase {
    Prepare,
    Chunks,
    Indexes,
    Done,
}

/// Regeneration sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerateState {
    pub run_id: Option<String>,
    /// Sitemaps to regenerate; empty means every sitemap
    pub sitemap_ids: Vec<String>,
    pub phase: RegeneratePhase,
    /// Index into `sitemap_ids` for the current phase
    pub position: usize,
    pub cursor: Option<SitemapCursor>,
    /// Flag serial observed before the first chunk
    pub serial: i64,
    pub links: i64,
    pub chunks: i64,
}

impl RegenerateState {
    pub fn new(sitemap_ids: Vec<String>) -> Self {
        Self {
            run_id: None,
            sitemap_ids,
            phase: RegeneratePhase::Prepare,
            position: 0,
            cursor: None,
            serial: 0,
            links: 0,
            chunks: 0,
        }
    }
}

/// Creates regeneration batches
pub struct Regenerator {
    config: Config,
    store: LinkStore,
    aliases: Option<Arc<dyn AliasProvider>>,
    fixed_now: Option<i64>,
}

impl Regenerator {
    pub fn new(config: &Config, store: LinkStore) -> Self {
        Self {
            config: config.clone(),
            store,
            aliases: None,
            fixed_now: None,
        }
    }

    pub fn with_alias_provider(mut self, aliases: Arc<dyn AliasProvider>) -> Self {
        self.aliases = Some(aliases);
        self
    }

    /// Pin the clock used for `lastmod` decay, timestamps and throttling
    pub fn with_now(mut self, now: i64) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// Whether the flag is raised and the minimum lifetime since the last run has passed
    pub async fn needs_regeneration(&self, now: i64) -> Result<bool> {
        if !self.store.is_regeneration_needed().await? {
            return Ok(false);
        }
        let elapsed = match self.store.generated_last().await? {
            Some(last) => now - last,
            None => return Ok(true),
        };
        Ok(elapsed >= self.config.generate.minimum_lifetime)
    }

    /// Batch regenerating `sitemap_ids`, or every sitemap when empty
    pub fn run_batch(&self, sitemap_ids: Vec<String>) -> RegenerateBatch {
        self.resume(RegenerateState::new(sitemap_ids))
    }

    /// Batch continuing from a saved sandbox
    pub fn resume(&self, state: RegenerateState) -> RegenerateBatch {
        let mut generator = match &self.aliases {
            Some(aliases) => {
                Generator::with_alias_provider(&self.config, self.store.clone(), aliases.clone())
            }
            None => Generator::new(&self.config, self.store.clone()),
        };
        if let Some(now) = self.fixed_now {
            generator = generator.with_now(now);
        }

        RegenerateBatch {
            store: self.store.clone(),
            governor: MemoryGovernor::new(&self.config),
            governed: false,
            chunk_size: self.config.generate.chunk_size.max(1) as i64,
            generator,
            state,
        }
    }
}

/// A running regeneration
pub struct RegenerateBatch {
    store: LinkStore,
    generator: Generator,
    governor: MemoryGovernor,
    /// Whether this process already adjusted its memory ceiling
    governed: bool,
    chunk_size: i64,
    state: RegenerateState,
}

impl RegenerateBatch {
    pub fn state(&self) -> &RegenerateState {
        &self.state
    }

    pub fn with_governor(mut self, governor: MemoryGovernor) -> Self {
        self.governor = governor;
        self
    }

    /// Adjust the ceiling once per process, whichever phase the batch starts in
    async fn govern_memory(&mut self) {
        if self.governed {
            return;
        }
        self.governed = true;
        let adjustment = self
            .governor
            .ensure_memory_limit(self.generator.alias_provider())
            .await;
        debug!(?adjustment, "Memory governor");
        if adjustment == MemoryAdjustment::Failed {
            info!("Continuing regeneration with the current memory ceiling");
        }
    }

    async fn prepare(&mut self) -> Result<()> {
        if self.state.sitemap_ids.is_empty() {
            self.state.sitemap_ids = self
                .store
                .list_sitemaps()
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
        }

        self.state.serial = self.store.regeneration_serial().await?;

        let run = BatchRun::new(RunOperation::Regenerate);
        self.store.insert_run(&run).await?;
        self.state.run_id = Some(run.id);

        info!(
            sitemaps = self.state.sitemap_ids.len(),
            serial = self.state.serial,
            "Regenerating sitemaps"
        );
        self.state.phase = RegeneratePhase::Chunks;
        self.state.position = 0;
        Ok(())
    }

    async fn load_sitemap(&self, id: &str) -> Result<Sitemap> {
        self.store
            .get_sitemap(id)
            .await?
            .ok_or_else(|| Error::SitemapNotFound(id.to_string()))
    }

    async fn chunk_step(&mut self) -> Result<StepReport> {
        let Some(id) = self.state.sitemap_ids.get(self.state.position).cloned() else {
            self.state.phase = RegeneratePhase::Indexes;
            self.state.position = 0;
            return Ok(StepReport::working(0.99, "Generated all chunks"));
        };
        let mut sitemap = self.load_sitemap(&id).await?;

        let fresh = self
            .state
            .cursor
            .as_ref()
            .map_or(true, |cursor| cursor.sitemap_id != id);
        if fresh {
            let visible = self.store.count_visible(&sitemap).await?;
            let max_expected = ((visible + self.chunk_size - 1) / self.chunk_size).max(1);
            self.state.cursor = Some(SitemapCursor {
                sitemap_id: id.clone(),
                chunk: 1,
                links: 0,
                max_expected,
                max_filesize: 0,
            });
        }
        let Some(mut cursor) = self.state.cursor.take() else {
            return Err(Error::Batch(format!("Lost cursor for sitemap {}", id)));
        };

        let page = self.generator.generate_page(&sitemap, cursor.chunk).await?;

        if page.links > 0 {
            cursor.links += page.links as i64;
            cursor.max_filesize = cursor.max_filesize.max(page.filesize as i64);
            let message = format!(
                "Generated chunk {} of sitemap {} ({} links)",
                cursor.chunk, id, page.links
            );
            let progress = (cursor.chunk as f64 / cursor.max_expected as f64).min(0.99);
            cursor.chunk += 1;
            self.state.cursor = Some(cursor);
            return Ok(StepReport::working(progress, message));
        }

        // The trailing chunk came back empty: the previous chunk was the last one
        if cursor.chunk > 1 {
            remove_with_gzip(&page.path)?;
        } else {
            cursor.max_filesize = page.filesize as i64;
        }
        let chunks = cursor.chunk - 1;

        sitemap.chunks = chunks;
        sitemap.links = cursor.links;
        sitemap.max_filesize = cursor.max_filesize;
        sitemap.updated = self.generator.now();
        self.store.save_sitemap(&sitemap).await?;
        self.generator.layout().remove_stale(&sitemap.id, chunks)?;

        self.state.links += cursor.links;
        self.state.chunks += chunks;
        self.state.position += 1;
        info!(
            sitemap = %sitemap.id,
            chunks,
            links = cursor.links,
            "Sitemap generated"
        );

        if self.state.position >= self.state.sitemap_ids.len() {
            self.state.phase = RegeneratePhase::Indexes;
            self.state.position = 0;
        }
        Ok(StepReport::working(
            0.99,
            format!("Finished sitemap {} ({} chunks, {} links)", id, chunks, cursor.links),
        ))
    }

    async fn index_step(&mut self) -> Result<StepReport> {
        while let Some(id) = self.state.sitemap_ids.get(self.state.position).cloned() {
            self.state.position += 1;
            let sitemap = self.load_sitemap(&id).await?;
            if sitemap.chunks > 1 {
                self.generator.generate_index(&sitemap).await?;
                return Ok(StepReport::working(
                    0.99,
                    format!("Generated index for sitemap {} ({} chunks)", id, sitemap.chunks),
                ));
            }
        }

        self.state.phase = RegeneratePhase::Done;
        Ok(StepReport::done(format!(
            "Regenerated {} sitemaps",
            self.state.sitemap_ids.len()
        )))
    }
}

#[async_trait]
impl BatchJob for RegenerateBatch {
    fn name(&self) -> &'static str {
        "regenerate"
    }

    async fn step(&mut self) -> Result<StepReport> {
        self.govern_memory().await;
        if self.state.phase == RegeneratePhase::Prepare {
            self.prepare().await?;
        }

        match self.state.phase {
            RegeneratePhase::Prepare | RegeneratePhase::Chunks => self.chunk_step().await,
            RegeneratePhase::Indexes => self.index_step().await,
            RegeneratePhase::Done => Ok(StepReport::done("Nothing left to regenerate")),
        }
    }

    async fn finish(&mut self, success: bool) -> Result<String> {
        let summary = format!(
            "{} sitemaps, {} chunks, {} links",
            self.state.sitemap_ids.len(),
            self.state.chunks,
            self.state.links
        );

        if success {
            let cleared = self
                .store
                .clear_regeneration_needed_if(self.state.serial)
                .await?;
            if !cleared {
                info!("Links changed during regeneration; another run is needed");
            }
            self.store.set_generated_last(self.generator.now()).await?;
        }

        if let Some(run_id) = &self.state.run_id {
            let status = if success {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            };
            self.store
                .complete_run(run_id, status, self.state.links, Some(&summary))
                .await?;
        }

        Ok(summary)
    }

    fn checkpoint(&self) -> BatchCheckpoint {
        BatchCheckpoint::Regenerate(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{run_batch, BatchObserver, LogObserver};
    use crate::memory::tests::FakeCeiling;
    use crate::store::test_support::setup_test_store;
    use crate::store::Link;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    fn config(out: &TempDir, chunk_size: usize) -> Config {
        let mut config = Config::default();
        config.generate.base_url = "https://example.com".to_string();
        config.generate.chunk_size = chunk_size;
        config.paths.output_dir = out.path().to_path_buf();
        config
    }

    async fn seed(store: &LinkStore, count: i64) {
        for id in 1..=count {
            let mut link = Link::new("node", id, format!("page-{:02}", id));
            store.save(&mut link).await.unwrap();
        }
    }

    async fn default_sitemap(store: &LinkStore) -> Sitemap {
        let sitemap = Sitemap::new(Default::default());
        store.save_sitemap(&sitemap).await.unwrap();
        sitemap
    }

    #[derive(Default)]
    struct Progress(Vec<f64>);

    impl BatchObserver for Progress {
        fn on_step(&mut self, report: &crate::batch::StepReport) {
            self.0.push(report.progress);
        }
    }

    #[tokio::test]
    async fn test_five_links_in_chunks_of_two() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        seed(&store, 5).await;
        let sitemap = default_sitemap(&store).await;
        let config = config(&out, 2);

        let regenerator = Regenerator::new(&config, store.clone()).with_now(NOW);
        let mut batch = regenerator.run_batch(vec![]);
        let mut progress = Progress::default();
        let outcome = run_batch(&mut batch, &mut progress).await;
        assert!(outcome.success, "{}", outcome.summary);

        let saved = store.get_sitemap(&sitemap.id).await.unwrap().unwrap();
        assert_eq!(saved.chunks, 3);
        assert_eq!(saved.links, 5);
        assert_eq!(saved.updated, NOW);
        assert!(saved.max_filesize > 0);

        let dir = out.path().join(&sitemap.id);
        assert!(dir.join("1.xml").exists());
        assert!(dir.join("3.xml").exists());
        assert!(!dir.join("4.xml").exists());
        let index = fs::read_to_string(dir.join("index.xml")).unwrap();
        assert_eq!(index.matches("<sitemap>").count(), 3);

        // Progress never reports completion before the last step
        let (last, rest) = progress.0.split_last().unwrap();
        assert_eq!(*last, 1.0);
        assert!(rest.iter().all(|p| *p < 1.0));

        assert!(!store.is_regeneration_needed().await.unwrap());
        assert_eq!(store.generated_last().await.unwrap(), Some(NOW));
        let runs = store.list_runs(1).await.unwrap();
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].items_processed, 5);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_chunk_size() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        seed(&store, 4).await;
        let sitemap = default_sitemap(&store).await;

        let mut batch = Regenerator::new(&config(&out, 2), store.clone())
            .with_now(NOW)
            .run_batch(vec![sitemap.id.clone()]);
        assert!(run_batch(&mut batch, &mut LogObserver).await.success);

        let saved = store.get_sitemap(&sitemap.id).await.unwrap().unwrap();
        assert_eq!(saved.chunks, 2);
        assert_eq!(saved.links, 4);
        let dir = out.path().join(&sitemap.id);
        assert!(dir.join("2.xml").exists());
        assert!(!dir.join("3.xml").exists());
        assert!(dir.join("index.xml").exists());
    }

    #[tokio::test]
    async fn test_empty_sitemap_keeps_valid_first_chunk() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        let sitemap = default_sitemap(&store).await;

        let mut batch = Regenerator::new(&config(&out, 2), store.clone())
            .with_now(NOW)
            .run_batch(vec![]);
        assert!(run_batch(&mut batch, &mut LogObserver).await.success);

        let saved = store.get_sitemap(&sitemap.id).await.unwrap().unwrap();
        assert_eq!(saved.chunks, 0);
        assert_eq!(saved.links, 0);
        let first = out.path().join(&sitemap.id).join("1.xml");
        assert!(fs::read_to_string(first).unwrap().contains("<urlset"));
        assert!(!out.path().join(&sitemap.id).join("index.xml").exists());
    }

    #[tokio::test]
    async fn test_shrinking_sitemap_removes_stale_files() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        seed(&store, 5).await;
        let sitemap = default_sitemap(&store).await;
        let regenerator = Regenerator::new(&config(&out, 2), store.clone()).with_now(NOW);

        assert!(run_batch(&mut regenerator.run_batch(vec![]), &mut LogObserver)
            .await
            .success);

        for id in 2..=5 {
            store.delete("node", id).await.unwrap();
        }
        assert!(run_batch(&mut regenerator.run_batch(vec![]), &mut LogObserver)
            .await
            .success);

        let saved = store.get_sitemap(&sitemap.id).await.unwrap().unwrap();
        assert_eq!(saved.chunks, 1);
        let dir = out.path().join(&sitemap.id);
        assert!(dir.join("1.xml").exists());
        assert!(!dir.join("2.xml").exists());
        assert!(!dir.join("3.xml").exists());
        assert!(!dir.join("index.xml").exists());
    }

    #[tokio::test]
    async fn test_mutation_during_run_keeps_flag() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        seed(&store, 3).await;
        default_sitemap(&store).await;
        assert!(store.is_regeneration_needed().await.unwrap());

        let mut batch = Regenerator::new(&config(&out, 2), store.clone())
            .with_now(NOW)
            .run_batch(vec![]);
        batch.step().await.unwrap();

        let mut late = Link::new("node", 99, "late");
        store.save(&mut late).await.unwrap();

        while !batch.step().await.unwrap().finished {}
        batch.finish(true).await.unwrap();
        assert!(store.is_regeneration_needed().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_run_is_recorded() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        seed(&store, 1).await;

        let mut batch = Regenerator::new(&config(&out, 2), store.clone())
            .with_now(NOW)
            .run_batch(vec!["missing".to_string()]);
        let outcome = run_batch(&mut batch, &mut LogObserver).await;
        assert!(!outcome.success);
        assert!(outcome.summary.contains("missing"));
        assert!(store.is_regeneration_needed().await.unwrap());
        assert_eq!(store.list_runs(1).await.unwrap()[0].status, "failed");
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        seed(&store, 5).await;
        let sitemap = default_sitemap(&store).await;
        let regenerator = Regenerator::new(&config(&out, 2), store.clone()).with_now(NOW);

        let mut first = regenerator.run_batch(vec![]);
        first.step().await.unwrap();
        first.step().await.unwrap();
        let BatchCheckpoint::Regenerate(state) = first.checkpoint() else {
            panic!("wrong checkpoint kind");
        };
        let state: RegenerateState =
            serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(state.cursor.as_ref().map(|c| c.chunk), Some(3));
        drop(first);

        let mut resumed = regenerator.resume(state);
        assert!(run_batch(&mut resumed, &mut LogObserver).await.success);
        let saved = store.get_sitemap(&sitemap.id).await.unwrap().unwrap();
        assert_eq!(saved.chunks, 3);
        assert_eq!(saved.links, 5);
    }

    #[tokio::test]
    async fn test_resumed_batch_adjusts_memory_ceiling() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        seed(&store, 5).await;
        default_sitemap(&store).await;
        let config = config(&out, 2);
        let regenerator = Regenerator::new(&config, store.clone()).with_now(NOW);

        let mut first = regenerator.run_batch(vec![]);
        first.step().await.unwrap();
        let BatchCheckpoint::Regenerate(state) = first.checkpoint() else {
            panic!("wrong checkpoint kind");
        };
        assert_eq!(state.phase, RegeneratePhase::Chunks);
        drop(first);

        let ceiling = Arc::new(AtomicU64::new(1_000));
        let governor = MemoryGovernor::with_ceiling(
            &config,
            Box::new(FakeCeiling {
                value: ceiling.clone(),
                refuse: false,
            }),
        );
        let mut resumed = regenerator.resume(state).with_governor(governor);
        resumed.step().await.unwrap();
        assert!(ceiling.load(Ordering::SeqCst) > 1_000);

        // Later steps leave the ceiling alone
        ceiling.store(1_000, Ordering::SeqCst);
        resumed.step().await.unwrap();
        assert_eq!(ceiling.load(Ordering::SeqCst), 1_000);
    }

    #[tokio::test]
    async fn test_needs_regeneration_respects_minimum_lifetime() {
        let (store, _db) = setup_test_store().await;
        let out = TempDir::new().unwrap();
        let mut config = config(&out, 2);
        config.generate.minimum_lifetime = 600;
        let regenerator = Regenerator::new(&config, store.clone());

        assert!(!regenerator.needs_regeneration(NOW).await.unwrap());
        store.notify_regeneration_needed().await.unwrap();
        assert!(regenerator.needs_regeneration(NOW).await.unwrap());

        store.set_generated_last(NOW - 60).await.unwrap();
        assert!(!regenerator.needs_regeneration(NOW).await.unwrap());
        assert!(regenerator.needs_regeneration(NOW + 600).await.unwrap());
    }
}
