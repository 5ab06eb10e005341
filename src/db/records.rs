//! Track record loading and persistence.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, TrackRecord};

impl Database {
    /// Load every record into the in-memory map
    pub(super) async fn load_records(&self) -> Result<()> {
        let rows = sqlx::query_as::<_, TrackRecord>(
            r#"
            SELECT key, state, failure_reason, download_path, updated_at
            FROM track_records
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load track records: {}",
                e
            )))
        })?;

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.clear();
        records.extend(rows.into_iter().map(|r| (r.key.clone(), r)));
        Ok(())
    }

    /// Insert or replace records, skipping ones that did not change
    ///
    /// All writes happen in one transaction. The in-memory map is updated only
    /// after the commit succeeds.
    pub async fn upsert_records(&self, records: Vec<TrackRecord>) -> Result<()> {
        let changed: Vec<TrackRecord> = {
            let current = self.records.read().unwrap_or_else(|e| e.into_inner());
            records
                .into_iter()
                .filter(|r| {
                    current.get(&r.key).is_none_or(|old| {
                        old.state != r.state
                            || old.failure_reason != r.failure_reason
                            || old.download_path != r.download_path
                    })
                })
                .collect()
        };

        if changed.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        for record in &changed {
            sqlx::query(
                r#"
                INSERT INTO track_records (key, state, failure_reason, download_path, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    state = excluded.state,
                    failure_reason = excluded.failure_reason,
                    download_path = excluded.download_path,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.key)
            .bind(record.state)
            .bind(record.failure_reason)
            .bind(&record.download_path)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to upsert track record: {}",
                    e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit track records: {}",
                e
            )))
        })?;

        tracing::debug!(count = changed.len(), "Run index updated");

        let mut current = self.records.write().unwrap_or_else(|e| e.into_inner());
        for record in changed {
            current.insert(record.key.clone(), record);
        }
        Ok(())
    }

    /// Recorded outcome for a track key
    pub fn record(&self, key: &str) -> Option<TrackRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Number of records held
    pub fn record_count(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
