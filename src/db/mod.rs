//! Run index for batchdl
//!
//! Persists the outcome of every attempted track in SQLite so later runs can
//! skip what was already downloaded or never found.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`records`] — Track record loading and upserts
//!
//! Records are loaded into memory when the database is opened, so
//! [`RunIndex::previous_result`] never touches the pool.

use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::Result;
use crate::services::{IndexSink, RunIndex};
use crate::types::{FailureReason, Track, TrackLists, TrackState};

mod migrations;
mod records;

/// Recorded outcome of one track
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TrackRecord {
    /// Track key (`artist;album;title;length;type`)
    pub key: String,
    /// State code (see [`TrackState::to_i32`])
    pub state: i32,
    /// Failure reason code (see [`FailureReason::to_i32`])
    pub failure_reason: i32,
    /// Local path, if any
    pub download_path: Option<String>,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

impl TrackRecord {
    fn from_track(track: &Track, now: i64) -> Self {
        Self {
            key: track.key(),
            state: track.state().to_i32(),
            failure_reason: track.failure_reason().to_i32(),
            download_path: track
                .download_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            updated_at: now,
        }
    }
}

/// SQLite-backed run index
pub struct Database {
    pool: SqlitePool,
    records: RwLock<HashMap<String, TrackRecord>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("records", &self.record_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IndexSink for Database {
    async fn update(&self, lists: &TrackLists) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let records: Vec<TrackRecord> = lists
            .flattened(true, true, false)
            .filter(|t| t.state().is_terminal())
            .map(|t| TrackRecord::from_track(t, now))
            .collect();
        self.upsert_records(records).await
    }
}

impl RunIndex for Database {
    fn previous_result(&self, track: &Track) -> Option<Track> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let record = records.get(&track.key())?;
        let state = TrackState::from_i32(record.state)?;

        let mut previous = track.clone();
        previous.candidates = None;
        previous.download_path = record.download_path.as_ref().map(PathBuf::from);
        Some(previous.with_recorded(state, FailureReason::from_i32(record.failure_reason)))
    }
}
