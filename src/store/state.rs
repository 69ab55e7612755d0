//! Persistent key/value state: the regeneration flag and generation timestamps.
//!
//! The flag carries a serial that every raise increments. A regeneration run snapshots
//! the serial when it starts and only clears the flag if no raise happened meanwhile.

use super::LinkStore;
use crate::error::Result;
use tracing::debug;

const REGENERATE_NEEDED: &str = "regenerate_needed";
const REGENERATE_SERIAL: &str = "regenerate_serial";
const GENERATED_LAST: &str = "generated_last";

impl LinkStore {
    async fn get_state(&self, name: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM state WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_state(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO state (name, value) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Raise the regeneration flag
    pub async fn notify_regeneration_needed(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO state (name, value) VALUES (?, '1')
            ON CONFLICT(name) DO UPDATE SET value = '1'
            "#,
        )
        .bind(REGENERATE_NEEDED)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO state (name, value) VALUES (?, '1')
            ON CONFLICT(name) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
            "#,
        )
        .bind(REGENERATE_SERIAL)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!("Regeneration flag raised");
        Ok(())
    }

    /// Whether a mutation since the last completed regeneration requires a new one
    pub async fn is_regeneration_needed(&self) -> Result<bool> {
        Ok(self.get_state(REGENERATE_NEEDED).await?.as_deref() == Some("1"))
    }

    /// Number of times the flag has been raised
    pub async fn regeneration_serial(&self) -> Result<i64> {
        Ok(self
            .get_state(REGENERATE_SERIAL)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Clear the flag only if it was not raised again after `serial` was observed.
    ///
    /// Returns whether the flag was cleared.
    pub async fn clear_regeneration_needed_if(&self, serial: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT value FROM state WHERE name = ?")
                .bind(REGENERATE_SERIAL)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);

        if current != serial {
            debug!(
                "Regeneration flag raised during run (serial {} -> {}), leaving it set",
                serial, current
            );
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO state (name, value) VALUES (?, '0')
            ON CONFLICT(name) DO UPDATE SET value = '0'
            "#,
        )
        .bind(REGENERATE_NEEDED)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Unix timestamp of the last completed regeneration
    pub async fn generated_last(&self) -> Result<Option<i64>> {
        Ok(self
            .get_state(GENERATED_LAST)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    pub async fn set_generated_last(&self, timestamp: i64) -> Result<()> {
        self.set_state(GENERATED_LAST, &timestamp.to_string()).await
    }
}
