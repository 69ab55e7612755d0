//! Link storage using SQLite
//!
//! This module owns every persistent record the generator works from:
//! - Links (one per indexable resource)
//! - Sitemaps (one per context, with chunk counts)
//! - URL aliases
//! - State (regeneration flag and timestamps)
//! - Batch runs (history and stats)
//!
//! Every mutation that can alter the generated output raises the regeneration flag.

mod aliases;
mod change;
mod link;
mod schema;
mod state;

pub use change::*;
pub use link::*;
pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::LANGUAGE_NONE;
use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Link database handle
#[derive(Clone)]
pub struct LinkStore {
    pool: SqlitePool,
    hooks: Vec<Arc<dyn LinkHook>>,
}

fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, conditions: &LinkConditions) {
    if let Some(link_type) = &conditions.link_type {
        qb.push(" AND link_type = ").push_bind(link_type.clone());
    }
    if let Some(link_types) = &conditions.link_types {
        if link_types.is_empty() {
            qb.push(" AND 0");
        } else {
            qb.push(" AND link_type IN (");
            let mut list = qb.separated(", ");
            for link_type in link_types {
                list.push_bind(link_type.clone());
            }
            list.push_unseparated(")");
        }
    }
    if let Some(id) = conditions.id {
        qb.push(" AND id = ").push_bind(id);
    }
    if let Some(ids) = &conditions.ids {
        if ids.is_empty() {
            qb.push(" AND 0");
        } else {
            qb.push(" AND id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(*id);
            }
            list.push_unseparated(")");
        }
    }
    if let Some(subtype) = &conditions.subtype {
        qb.push(" AND subtype = ").push_bind(subtype.clone());
    }
    if let Some(language) = &conditions.language {
        qb.push(" AND language = ").push_bind(language.clone());
    }
    if let Some(access) = conditions.access {
        qb.push(" AND access = ").push_bind(access);
    }
    if let Some(status) = conditions.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(status_override) = conditions.status_override {
        qb.push(" AND status_override = ").push_bind(status_override);
    }
    if let Some(priority_override) = conditions.priority_override {
        qb.push(" AND priority_override = ").push_bind(priority_override);
    }
}

/// Restrict to links emitted for a sitemap context
fn push_visible(qb: &mut QueryBuilder<'_, Sqlite>, sitemap: &Sitemap) {
    qb.push(" AND access = 1 AND status = 1");
    if let Some(language) = sitemap.language() {
        qb.push(" AND language IN (")
            .push_bind(language.to_string())
            .push(", ")
            .push_bind(LANGUAGE_NONE)
            .push(")");
    }
}

fn valid_priority(priority: f64) -> bool {
    (0.0..=1.0).contains(&priority)
}

impl LinkStore {
    /// Connect to the link database configured in `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Connect to the link database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            hooks: Vec::new(),
        })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='links'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Register a hook run on every saved link
    pub fn add_hook(&mut self, hook: Arc<dyn LinkHook>) {
        self.hooks.push(hook);
    }

    // ===== Link Operations =====

    /// Load one link by key
    pub async fn load(&self, link_type: &str, id: i64) -> Result<Option<Link>> {
        let row = sqlx::query_as::<_, LinkRow>("SELECT * FROM links WHERE link_type = ? AND id = ?")
            .bind(link_type)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Link::try_from).transpose()
    }

    /// Load every link matching `conditions`, ordered by key
    pub async fn load_multiple(&self, conditions: &LinkConditions) -> Result<Vec<Link>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM links WHERE 1 = 1");
        push_conditions(&mut qb, conditions);
        qb.push(" ORDER BY link_type ASC, id ASC");

        let rows = qb.build_query_as::<LinkRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Link::try_from).collect()
    }

    /// Count links matching `conditions`
    pub async fn count(&self, conditions: &LinkConditions) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM links WHERE 1 = 1");
        push_conditions(&mut qb, conditions);
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Insert or replace a link.
    ///
    /// Hooks run first, then the priority is validated and a negative change count is
    /// clamped. The regeneration flag is raised before the row is written when the save
    /// changes the output.
    pub async fn save(&self, link: &mut Link) -> Result<SaveOutcome> {
        let original = self.load(&link.link_type, link.id).await?;

        for hook in &self.hooks {
            hook.presave(link);
        }
        for hook in &self.hooks {
            match &original {
                Some(original) => hook.on_update(link, original),
                None => hook.on_insert(link),
            }
        }

        if !valid_priority(link.priority) {
            warn!(
                "Rejecting link {}:{} with priority {}",
                link.link_type, link.id, link.priority
            );
            return Err(Error::InvalidPriority {
                link_type: link.link_type.clone(),
                id: link.id,
                priority: link.priority,
            });
        }

        if link.changecount < 0 {
            warn!(
                "Negative change count {} for link {}:{}, clamping to 0",
                link.changecount, link.link_type, link.id
            );
            link.changecount = 0;
        }

        if check_changed_link(link, original.as_ref()) {
            self.notify_regeneration_needed().await?;
        }

        let extra_json = if link.extra.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&link.extra)?)
        };

        sqlx::query(
            r#"
            INSERT INTO links (link_type, id, subtype, loc, language, access, status,
                status_override, lastmod, priority, priority_override, changefreq,
                changecount, extra_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(link_type, id) DO UPDATE SET
                subtype = excluded.subtype,
                loc = excluded.loc,
                language = excluded.language,
                access = excluded.access,
                status = excluded.status,
                status_override = excluded.status_override,
                lastmod = excluded.lastmod,
                priority = excluded.priority,
                priority_override = excluded.priority_override,
                changefreq = excluded.changefreq,
                changecount = excluded.changecount,
                extra_json = excluded.extra_json
            "#,
        )
        .bind(&link.link_type)
        .bind(link.id)
        .bind(&link.subtype)
        .bind(&link.loc)
        .bind(&link.language)
        .bind(link.access)
        .bind(link.status)
        .bind(link.status_override)
        .bind(link.lastmod)
        .bind(link.priority)
        .bind(link.priority_override)
        .bind(link.changefreq)
        .bind(link.changecount)
        .bind(extra_json)
        .execute(&self.pool)
        .await?;

        Ok(if original.is_some() {
            SaveOutcome::Updated
        } else {
            SaveOutcome::Inserted
        })
    }

    /// Delete one link
    pub async fn delete(&self, link_type: &str, id: i64) -> Result<u64> {
        self.delete_multiple(&LinkConditions::for_link(link_type, id))
            .await
    }

    /// Delete every link matching `conditions`
    pub async fn delete_multiple(&self, conditions: &LinkConditions) -> Result<u64> {
        if self
            .check_changed_links(conditions, &LinkUpdates::default())
            .await?
        {
            self.notify_regeneration_needed().await?;
        }

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM links WHERE 1 = 1");
        push_conditions(&mut qb, conditions);
        let result = qb.build().execute(&self.pool).await?;

        debug!("Deleted {} links", result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Apply `updates` to every link matching `conditions`
    pub async fn update_multiple(
        &self,
        conditions: &LinkConditions,
        updates: &LinkUpdates,
    ) -> Result<u64> {
        if let Some(priority) = updates.priority {
            if !valid_priority(priority) {
                return Err(Error::InvalidPriority {
                    link_type: conditions.link_type.clone().unwrap_or_else(|| "*".to_string()),
                    id: conditions.id.unwrap_or(0),
                    priority,
                });
            }
        }

        if updates.is_empty() {
            return Ok(0);
        }

        if self.check_changed_links(conditions, updates).await? {
            self.notify_regeneration_needed().await?;
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE links SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(subtype) = &updates.subtype {
                set.push("subtype = ").push_bind_unseparated(subtype.clone());
            }
            if let Some(loc) = &updates.loc {
                set.push("loc = ").push_bind_unseparated(loc.clone());
            }
            if let Some(language) = &updates.language {
                set.push("language = ").push_bind_unseparated(language.clone());
            }
            if let Some(access) = updates.access {
                set.push("access = ").push_bind_unseparated(access);
            }
            if let Some(status) = updates.status {
                set.push("status = ").push_bind_unseparated(status);
            }
            if let Some(status_override) = updates.status_override {
                set.push("status_override = ")
                    .push_bind_unseparated(status_override);
            }
            if let Some(priority) = updates.priority {
                set.push("priority = ").push_bind_unseparated(priority);
            }
            if let Some(priority_override) = updates.priority_override {
                set.push("priority_override = ")
                    .push_bind_unseparated(priority_override);
            }
            if let Some(changefreq) = updates.changefreq {
                set.push("changefreq = ").push_bind_unseparated(changefreq);
            }
            if let Some(lastmod) = updates.lastmod {
                set.push("lastmod = ").push_bind_unseparated(lastmod);
            }
        }
        qb.push(" WHERE 1 = 1");
        push_conditions(&mut qb, conditions);

        let result = qb.build().execute(&self.pool).await?;
        debug!("Updated {} links", result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Whether a bulk mutation over `conditions` could alter the output
    pub async fn check_changed_links(
        &self,
        conditions: &LinkConditions,
        updates: &LinkUpdates,
    ) -> Result<bool> {
        let Some(visible) = visible_after_updates(conditions, updates) else {
            return Ok(false);
        };
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT 1 FROM links WHERE 1 = 1");
        push_conditions(&mut qb, &visible);
        qb.push(" LIMIT 1");
        let hit: Option<i32> = qb
            .build_query_scalar::<i32>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(hit.is_some())
    }

    /// Number of links emitted for a sitemap
    pub async fn count_visible(&self, sitemap: &Sitemap) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM links WHERE 1 = 1");
        push_visible(&mut qb, sitemap);
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// One page of emitted links, in output order
    pub async fn visible_page(
        &self,
        sitemap: &Sitemap,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Link>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM links WHERE 1 = 1");
        push_visible(&mut qb, sitemap);
        qb.push(" ORDER BY language DESC, loc ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build_query_as::<LinkRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Link::try_from).collect()
    }

    // ===== Sitemap Operations =====

    /// Insert or update a sitemap
    pub async fn save_sitemap(&self, sitemap: &Sitemap) -> Result<()> {
        let context_json = serde_json::to_string(&sitemap.context)?;
        sqlx::query(
            r#"
            INSERT INTO sitemaps (id, context_json, chunks, links, max_filesize, updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                context_json = excluded.context_json,
                chunks = excluded.chunks,
                links = excluded.links,
                max_filesize = excluded.max_filesize,
                updated = excluded.updated
            "#,
        )
        .bind(&sitemap.id)
        .bind(context_json)
        .bind(sitemap.chunks)
        .bind(sitemap.links)
        .bind(sitemap.max_filesize)
        .bind(sitemap.updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get sitemap by ID
    pub async fn get_sitemap(&self, id: &str) -> Result<Option<Sitemap>> {
        let row = sqlx::query_as::<_, SitemapRow>("SELECT * FROM sitemaps WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Sitemap::try_from).transpose()
    }

    /// List all sitemaps
    pub async fn list_sitemaps(&self) -> Result<Vec<Sitemap>> {
        let rows = sqlx::query_as::<_, SitemapRow>("SELECT * FROM sitemaps ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Sitemap::try_from).collect()
    }

    /// Delete a sitemap record
    pub async fn delete_sitemap(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sitemaps WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ===== Batch Run Operations =====

    /// Insert a new batch run
    pub async fn insert_run(&self, run: &BatchRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_runs (id, operation, started_at, completed_at, status,
                items_processed, summary)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.operation)
        .bind(&run.started_at)
        .bind(&run.completed_at)
        .bind(&run.status)
        .bind(run.items_processed)
        .bind(&run.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a batch run as finished
    pub async fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        items_processed: i64,
        summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batch_runs SET
                completed_at = ?,
                status = ?,
                items_processed = ?,
                summary = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(items_processed)
        .bind(summary)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent batch runs, newest first
    pub async fn list_runs(&self, limit: i64) -> Result<Vec<BatchRun>> {
        let runs = sqlx::query_as::<_, BatchRun>(
            "SELECT * FROM batch_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    // ===== Statistics =====

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT link_type, COUNT(*), COALESCE(SUM(CASE WHEN access = 1 AND status = 1 THEN 1 ELSE 0 END), 0)
            FROM links
            GROUP BY link_type
            ORDER BY link_type ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let sitemap_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sitemaps")
            .fetch_one(&self.pool)
            .await?;
        let alias_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM url_aliases")
            .fetch_one(&self.pool)
            .await?;

        let by_type: Vec<TypeStats> = rows
            .into_iter()
            .map(|(link_type, total, visible)| TypeStats {
                link_type,
                total_links: total as usize,
                visible_links: visible as usize,
            })
            .collect();

        Ok(GlobalStats {
            link_count: by_type.iter().map(|t| t.total_links).sum(),
            visible_count: by_type.iter().map(|t| t.visible_links).sum(),
            sitemap_count: sitemap_count as usize,
            alias_count: alias_count as usize,
            by_type,
        })
    }
}

/// Link counts for one link type
#[derive(Debug, Clone, serde::Serialize)]
pub struct TypeStats {
    pub link_type: String,
    pub total_links: usize,
    pub visible_links: usize,
}

/// Global statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct GlobalStats {
    pub link_count: usize,
    pub visible_count: usize,
    pub sitemap_count: usize,
    pub alias_count: usize,
    pub by_type: Vec<TypeStats>,
}
