//! Link resynchronization batch
//!
//! Pages through every resource provider in ascending id order and saves the mapped
//! links. Each step handles at most `batch_limit` resources of one link type.

use super::{BatchCheckpoint, BatchJob, StepReport};
use crate::config::Config;
use crate::error::Result;
use crate::provider::{find_provider, sync_resource, ResourceProvider};
use crate::store::{BatchRun, LinkConditions, LinkStore, RunOperation, RunStatus, SaveOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildOptions {
    /// Delete existing links of the rebuilt types first
    #[serde(default)]
    pub clear: bool,
    /// When clearing, keep links an administrator has overridden
    #[serde(default)]
    pub keep_custom: bool,
}

/// Progress through one link type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncState {
    pub link_type: String,
    pub last_id: i64,
    pub progress: u64,
    /// Candidate count, taken on the first page
    pub max: Option<u64>,
}

impl ResyncState {
    pub fn new(link_type: impl Into<String>) -> Self {
        Self {
            link_type: link_type.into(),
            last_id: 0,
            progress: 0,
            max: None,
        }
    }
}

/// Rebuild sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildState {
    pub run_id: Option<String>,
    pub options: RebuildOptions,
    pub clear_pending: bool,
    /// Index into `resync` of the type being synchronized
    pub position: usize,
    pub resync: Vec<ResyncState>,
    pub inserted: u64,
    pub updated: u64,
}

impl RebuildState {
    pub fn new(link_types: Vec<String>, options: RebuildOptions) -> Self {
        Self {
            run_id: None,
            clear_pending: options.clear,
            options,
            position: 0,
            resync: link_types.into_iter().map(ResyncState::new).collect(),
            inserted: 0,
            updated: 0,
        }
    }

    pub fn link_types(&self) -> Vec<String> {
        self.resync.iter().map(|r| r.link_type.clone()).collect()
    }

    fn progress(&self) -> f64 {
        let (done, total) = self.resync.iter().fold((0u64, 0u64), |(done, total), r| {
            let max = r.max.unwrap_or(0);
            (done + r.progress.min(max), total + max)
        });
        if total == 0 {
            return self.position as f64 / self.resync.len().max(1) as f64;
        }
        done as f64 / total as f64
    }
}

/// A running resynchronization
pub struct RebuildBatch {
    config: Config,
    store: LinkStore,
    providers: Vec<Box<dyn ResourceProvider>>,
    state: RebuildState,
}

impl RebuildBatch {
    /// Rebuild `link_types`, or every provided type when empty
    pub fn new(
        config: &Config,
        store: LinkStore,
        providers: Vec<Box<dyn ResourceProvider>>,
        link_types: Vec<String>,
        options: RebuildOptions,
    ) -> Self {
        let link_types = if link_types.is_empty() {
            providers
                .iter()
                .map(|p| p.resource_type().to_string())
                .collect()
        } else {
            link_types
        };
        Self::resume(config, store, providers, RebuildState::new(link_types, options))
    }

    /// Continue from a saved sandbox
    pub fn resume(
        config: &Config,
        store: LinkStore,
        providers: Vec<Box<dyn ResourceProvider>>,
        state: RebuildState,
    ) -> Self {
        Self {
            config: config.clone(),
            store,
            providers,
            state,
        }
    }

    pub fn state(&self) -> &RebuildState {
        &self.state
    }

    async fn clear(&mut self) -> Result<StepReport> {
        let mut conditions = LinkConditions::for_types(self.state.link_types());
        if self.state.options.keep_custom {
            conditions.status_override = Some(false);
            conditions.priority_override = Some(false);
        }
        let deleted = self.store.delete_multiple(&conditions).await?;
        self.state.clear_pending = false;
        info!(
            deleted,
            keep_custom = self.state.options.keep_custom,
            "Cleared links before rebuild"
        );
        Ok(StepReport::working(0.0, format!("Deleted {} links", deleted)))
    }

    async fn resync_step(&mut self) -> Result<StepReport> {
        let position = self.state.position;
        let Some(current) = self.state.resync.get(position).cloned() else {
            return Ok(StepReport::done(self.summary()));
        };
        let provider = find_provider(&self.providers, &current.link_type)?;

        let max = match current.max {
            Some(max) => max,
            None => provider.count_candidates().await?,
        };
        let page = provider
            .fetch_after(current.last_id, self.config.generate.batch_limit.max(1))
            .await?;

        let mut last_id = current.last_id;
        let (mut inserted, mut updated) = (0, 0);
        for resource in &page {
            match sync_resource(&self.store, &self.config, provider, resource).await? {
                SaveOutcome::Inserted => inserted += 1,
                SaveOutcome::Updated => updated += 1,
            }
            last_id = last_id.max(resource.id);
        }

        let progress = current.progress + page.len() as u64;
        let type_done = page.is_empty() || progress >= max;
        debug!(
            link_type = %current.link_type,
            last_id,
            progress,
            max,
            "Resynchronized page"
        );

        if let Some(resync) = self.state.resync.get_mut(position) {
            resync.last_id = last_id;
            resync.progress = progress;
            resync.max = Some(max);
        }
        self.state.inserted += inserted;
        self.state.updated += updated;

        if type_done {
            info!(link_type = %current.link_type, links = progress, "Link type resynchronized");
            self.state.position += 1;
            if self.state.position >= self.state.resync.len() {
                return Ok(StepReport::done(self.summary()));
            }
        }

        Ok(StepReport::working(
            self.state.progress().min(0.99),
            format!(
                "Synchronized {} of {} {} links",
                progress.min(max),
                max,
                current.link_type
            ),
        ))
    }

    fn summary(&self) -> String {
        format!(
            "{} link types, {} inserted, {} updated",
            self.state.resync.len(),
            self.state.inserted,
            self.state.updated
        )
    }
}

#[async_trait]
impl BatchJob for RebuildBatch {
    fn name(&self) -> &'static str {
        "rebuild"
    }

    async fn step(&mut self) -> Result<StepReport> {
        if self.state.run_id.is_none() {
            let run = BatchRun::new(RunOperation::Rebuild);
            self.store.insert_run(&run).await?;
            self.state.run_id = Some(run.id);
        }

        if self.state.clear_pending {
            return self.clear().await;
        }
        self.resync_step().await
    }

    async fn finish(&mut self, success: bool) -> Result<String> {
        let summary = self.summary();
        if success {
            self.store.notify_regeneration_needed().await?;
        }
        if let Some(run_id) = &self.state.run_id {
            let status = if success {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            };
            let items = (self.state.inserted + self.state.updated) as i64;
            self.store
                .complete_run(run_id, status, items, Some(&summary))
                .await?;
        }
        Ok(summary)
    }

    fn checkpoint(&self) -> BatchCheckpoint {
        BatchCheckpoint::Rebuild(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{run_batch, run_batch_with_checkpoint, CheckpointFile, LogObserver};
    use crate::provider::{JsonResourceProvider, Resource};
    use crate::store::test_support::setup_test_store;
    use crate::store::Link;
    use crate::LANGUAGE_NONE;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn resources(ids: std::ops::RangeInclusive<i64>) -> Vec<Resource> {
        ids.map(|id| Resource {
            id,
            subtype: String::new(),
            loc: format!("node/{}", id),
            language: LANGUAGE_NONE.to_string(),
            lastmod: 0,
            viewable: true,
            alias: None,
            extra: BTreeMap::new(),
        })
        .collect()
    }

    fn providers(count: i64) -> Vec<Box<dyn ResourceProvider>> {
        vec![Box::new(JsonResourceProvider::new("node", resources(1..=count)))]
    }

    fn config(batch_limit: usize) -> Config {
        let mut config = Config::default();
        config.generate.batch_limit = batch_limit;
        config
    }

    #[tokio::test]
    async fn test_rebuild_pages_through_provider() {
        let (store, _tmp) = setup_test_store().await;
        let mut batch = RebuildBatch::new(
            &config(2),
            store.clone(),
            providers(5),
            vec![],
            RebuildOptions::default(),
        );
        let outcome = run_batch(&mut batch, &mut LogObserver).await;
        assert!(outcome.success, "{}", outcome.summary);
        assert_eq!(outcome.steps, 3);
        assert_eq!(outcome.summary, "1 link types, 5 inserted, 0 updated");

        assert_eq!(store.count(&LinkConditions::for_type("node")).await.unwrap(), 5);
        let resync = &batch.state().resync[0];
        assert_eq!(resync.last_id, 5);
        assert_eq!(resync.max, Some(5));
        assert!(store.is_regeneration_needed().await.unwrap());
        assert_eq!(store.list_runs(1).await.unwrap()[0].items_processed, 5);
    }

    fn modified_providers() -> Vec<Box<dyn ResourceProvider>> {
        let mut items = resources(1..=5);
        for resource in &mut items {
            resource.lastmod = 1_700_000_000 + resource.id;
        }
        vec![Box::new(JsonResourceProvider::new("node", items))]
    }

    #[tokio::test]
    async fn test_resume_after_interruption() {
        let config = config(2);
        let (reference, _ref_tmp) = setup_test_store().await;
        let mut uninterrupted = RebuildBatch::new(
            &config,
            reference.clone(),
            modified_providers(),
            vec!["node".to_string()],
            RebuildOptions::default(),
        );
        assert!(run_batch(&mut uninterrupted, &mut LogObserver).await.success);

        let (store, _tmp) = setup_test_store().await;
        let dir = TempDir::new().unwrap();
        let file = CheckpointFile::new(dir.path().join("batch.json"));
        let mut first = RebuildBatch::new(
            &config,
            store.clone(),
            modified_providers(),
            vec!["node".to_string()],
            RebuildOptions::default(),
        );
        first.step().await.unwrap();
        file.save(&first.checkpoint()).unwrap();
        // Second page is written but the process dies before its checkpoint lands
        first.step().await.unwrap();
        assert_eq!(store.count(&LinkConditions::for_type("node")).await.unwrap(), 4);
        drop(first);

        let Some(BatchCheckpoint::Rebuild(state)) = file.load().unwrap() else {
            panic!("missing rebuild checkpoint");
        };
        assert_eq!(state.resync[0].last_id, 2);

        let mut resumed =
            RebuildBatch::resume(&config, store.clone(), modified_providers(), state);
        let outcome = run_batch_with_checkpoint(&mut resumed, &mut LogObserver, Some(&file)).await;
        assert!(outcome.success, "{}", outcome.summary);
        // Links 3 and 4 are replayed as updates
        assert_eq!(outcome.summary, "1 link types, 3 inserted, 2 updated");
        assert!(file.load().unwrap().is_none());

        let expected = reference.load_multiple(&LinkConditions::default()).await.unwrap();
        let actual = store.load_multiple(&LinkConditions::default()).await.unwrap();
        assert_eq!(expected.len(), 5);
        assert_eq!(actual, expected);
        assert!(actual.iter().all(|link| link.changecount == 0));
    }

    #[tokio::test]
    async fn test_early_empty_page_finishes() {
        let (store, _tmp) = setup_test_store().await;
        let mut batch = RebuildBatch::new(
            &config(10),
            store.clone(),
            providers(3),
            vec![],
            RebuildOptions::default(),
        );
        // Pretend the provider announced more candidates than it yields
        batch.state.resync[0].max = Some(50);

        let outcome = run_batch(&mut batch, &mut LogObserver).await;
        assert!(outcome.success);
        assert_eq!(outcome.steps, 2);
        assert_eq!(store.count(&LinkConditions::for_type("node")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_clear_keeps_custom_links() {
        let (store, _tmp) = setup_test_store().await;
        let mut stale = Link::new("node", 100, "gone");
        store.save(&mut stale).await.unwrap();
        let mut pinned = Link::new("node", 200, "pinned");
        pinned.priority = 0.9;
        pinned.priority_override = true;
        store.save(&mut pinned).await.unwrap();
        let mut other = Link::new("user", 1, "user/1");
        store.save(&mut other).await.unwrap();

        let options = RebuildOptions {
            clear: true,
            keep_custom: true,
        };
        let mut batch = RebuildBatch::new(&config(10), store.clone(), providers(2), vec![], options);
        assert!(run_batch(&mut batch, &mut LogObserver).await.success);

        assert!(store.load("node", 100).await.unwrap().is_none());
        assert!(store.load("node", 200).await.unwrap().is_some());
        assert!(store.load("node", 1).await.unwrap().is_some());
        assert!(store.load("user", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_type_fails() {
        let (store, _tmp) = setup_test_store().await;
        let mut batch = RebuildBatch::new(
            &config(10),
            store.clone(),
            providers(2),
            vec!["taxonomy".to_string()],
            RebuildOptions::default(),
        );
        let outcome = run_batch(&mut batch, &mut LogObserver).await;
        assert!(!outcome.success);
        assert!(outcome.summary.contains("taxonomy"));
        assert_eq!(store.list_runs(1).await.unwrap()[0].status, "failed");
    }
}
