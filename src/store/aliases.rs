//! URL alias table backed by the link database

use super::LinkStore;
use crate::alias::AliasProvider;
use crate::error::Result;
use crate::LANGUAGE_NONE;
use async_trait::async_trait;
use std::collections::HashMap;

impl LinkStore {
    /// Register an alias. When several exist for the same source and language the most
    /// recently added one wins.
    pub async fn save_alias(&self, source: &str, alias: &str, language: &str) -> Result<()> {
        sqlx::query("INSERT INTO url_aliases (source, alias, language) VALUES (?, ?, ?)")
            .bind(source)
            .bind(alias)
            .bind(language)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every alias for `source` in `language`
    pub async fn delete_aliases(&self, source: &str, language: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM url_aliases WHERE source = ? AND language = ?")
            .bind(source)
            .bind(language)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AliasProvider for LinkStore {
    async fn load_aliases(&self, language: &str) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT source, alias FROM url_aliases WHERE language = ? ORDER BY pid ASC",
        )
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        // Later rows overwrite earlier ones
        Ok(rows.into_iter().collect())
    }

    async fn lookup_alias(&self, path: &str, language: &str) -> Result<Option<String>> {
        let alias: Option<String> = sqlx::query_scalar(
            r#"
            SELECT alias FROM url_aliases
            WHERE source = ? AND language IN (?, ?)
            ORDER BY CASE WHEN language = ? THEN 1 ELSE 0 END, pid DESC
            LIMIT 1
            "#,
        )
        .bind(path)
        .bind(language)
        .bind(LANGUAGE_NONE)
        .bind(LANGUAGE_NONE)
        .fetch_optional(&self.pool)
        .await?;
        Ok(alias)
    }

    async fn count_aliases(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM url_aliases")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::alias::AliasProvider;
    use crate::store::test_support::setup_test_store;

    #[tokio::test]
    async fn test_latest_alias_wins() {
        let (store, _tmp) = setup_test_store().await;
        store.save_alias("node/1", "old", "und").await.unwrap();
        store.save_alias("node/1", "new", "und").await.unwrap();

        let aliases = store.load_aliases("und").await.unwrap();
        assert_eq!(aliases.get("node/1").map(String::as_str), Some("new"));
        assert_eq!(
            store.lookup_alias("node/1", "und").await.unwrap().as_deref(),
            Some("new")
        );
        assert_eq!(store.count_aliases().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lookup_prefers_specific_language() {
        let (store, _tmp) = setup_test_store().await;
        store.save_alias("node/1", "about", "und").await.unwrap();
        store.save_alias("node/1", "a-propos", "fr").await.unwrap();

        assert_eq!(
            store.lookup_alias("node/1", "fr").await.unwrap().as_deref(),
            Some("a-propos")
        );
        assert_eq!(
            store.lookup_alias("node/1", "de").await.unwrap().as_deref(),
            Some("about")
        );
        assert_eq!(store.lookup_alias("node/2", "fr").await.unwrap(), None);

        assert_eq!(store.delete_aliases("node/1", "fr").await.unwrap(), 1);
        assert_eq!(
            store.lookup_alias("node/1", "fr").await.unwrap().as_deref(),
            Some("about")
        );
    }
}
