//! Batch download engine split into focused submodules.
//!
//! The `BatchDownloader` struct and its methods are organized by concern:
//! - [`orchestration`] - Per-item main loop and parallel source searches
//! - [`skip`] - Skip-existing and skip-not-found gates
//! - [`preprocess`] - Track string normalization
//! - [`track_task`] - Single-track download with retries
//! - [`album`] - All-or-nothing album downloads
//! - [`images`] - Album art selection and download
//! - [`interactive`] - Interactive candidate selection
//! - [`cleanup`] - Failed album quarantine and deletion
//! - [`on_complete`] - Post-completion commands
//! - [`watchdog`] - Session supervision and stall detection

mod album;
mod cleanup;
mod images;
mod interactive;
mod on_complete;
mod orchestration;
mod preprocess;
mod skip;
mod track_task;
mod watchdog;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use preprocess::Preprocessor;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, OnceCell, broadcast};
use tokio_util::sync::CancellationToken;

use crate::commands::CommandBus;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::file_index::DirectoryIndex;
use crate::rate_limiter::SearchRateLimiter;
use crate::services::{FileIndex, RunIndex, Services};
use crate::session::Session;
use crate::types::{Event, Track, TrackLists, TrackRef};

/// Local file indexes consulted by skip-existing
#[derive(Clone, Default)]
pub(crate) struct LocalIndexes {
    /// Index over the output directory
    pub(crate) output: Option<Arc<dyn FileIndex>>,
    /// Index over the music library
    pub(crate) music: Option<Arc<dyn FileIndex>>,
}

/// State that lives for one run
#[derive(Clone)]
pub(crate) struct RunState {
    /// `(username, remote dir)` pairs whose full folder has been retrieved
    pub(crate) retrieved_folders: Arc<std::sync::Mutex<HashSet<(String, String)>>>,
    /// Set when the user quits from interactive mode
    pub(crate) quit: Arc<AtomicBool>,
    /// Initialized once the session is logged in and the watchdog runs
    pub(crate) session_started: Arc<OnceCell<()>>,
    /// Stops the watchdog
    pub(crate) shutdown: CancellationToken,
    /// Run index opened from the configuration
    pub(crate) run_index: Option<Arc<Database>>,
}

impl RunState {
    fn new(run_index: Option<Arc<Database>>) -> Self {
        Self {
            retrieved_folders: Arc::new(std::sync::Mutex::new(HashSet::new())),
            quit: Arc::new(AtomicBool::new(false)),
            session_started: Arc::new(OnceCell::new()),
            shutdown: CancellationToken::new(),
            run_index,
        }
    }
}

/// Address of a track that may be an entry's source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TrackSlot {
    /// The entry's source track
    Source(usize),
    /// A track inside a candidate group
    Child(TrackRef),
}

impl TrackSlot {
    pub(crate) fn entry(&self) -> usize {
        match self {
            TrackSlot::Source(entry) => *entry,
            TrackSlot::Child(at) => at.entry,
        }
    }

    pub(crate) fn get<'a>(&self, lists: &'a TrackLists) -> Option<&'a Track> {
        match self {
            TrackSlot::Source(entry) => lists.entries.get(*entry).map(|e| &e.source),
            TrackSlot::Child(at) => lists.track(*at),
        }
    }

    pub(crate) fn get_mut<'a>(&self, lists: &'a mut TrackLists) -> Option<&'a mut Track> {
        match self {
            TrackSlot::Source(entry) => lists.entries.get_mut(*entry).map(|e| &mut e.source),
            TrackSlot::Child(at) => lists.track_mut(*at),
        }
    }
}

/// Batch download engine (cloneable - all fields are Arc-wrapped)
///
/// Owns the track lists for the duration of a run. Every read or write of track
/// state goes through the `lists` mutex; network and filesystem work happens
/// outside of it.
#[derive(Clone)]
pub struct BatchDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Everything the run works on
    pub(crate) lists: Arc<Mutex<TrackLists>>,
    /// External collaborators
    pub(crate) services: Services,
    /// Login state, active searches and transfers
    pub(crate) session: Session,
    /// Rolling-window limiter shared by every search
    pub(crate) search_limiter: SearchRateLimiter,
    /// Key presses from the front-end
    pub(crate) commands: CommandBus,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Compiled preprocessing rules
    pub(crate) preprocessor: Arc<Preprocessor>,
    /// Skip-existing indexes
    pub(crate) indexes: LocalIndexes,
    /// Per-run bookkeeping
    pub(crate) run: RunState,
}

impl BatchDownloader {
    /// Create a downloader for one batch
    ///
    /// Validates the configuration, compiles the preprocessing rules and opens
    /// the run index when it is written or consulted. Entries without their own
    /// index get the configured one.
    pub async fn new(config: Config, mut lists: TrackLists, services: Services) -> Result<Self> {
        config.validate()?;
        let preprocessor = Preprocessor::new(&config.preprocess)?;

        let run_index = if config.index.write_index || config.skip.skip_not_found {
            let db = Arc::new(Database::new(&config.index_path()).await?);
            let index: Arc<dyn RunIndex> = db.clone();
            for entry in lists.entries.iter_mut().filter(|e| e.index.is_none()) {
                entry.index = Some(index.clone());
            }
            Some(db)
        } else {
            None
        };

        let indexes = if config.skip.skip_existing {
            LocalIndexes {
                output: Some(Arc::new(DirectoryIndex::new(&config.download.output_dir))),
                music: config
                    .skip
                    .music_dir
                    .as_ref()
                    .map(|dir| Arc::new(DirectoryIndex::new(dir)) as Arc<dyn FileIndex>),
            }
        } else {
            LocalIndexes::default()
        };

        let session = Session::new(services.session.clone(), config.session.clone());
        let search_limiter =
            SearchRateLimiter::new(config.search.searches_per_window, config.search.window);

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        tracing::debug!(
            entries = lists.len(),
            run_index = run_index.is_some(),
            skip_existing = config.skip.skip_existing,
            "Batch downloader created"
        );

        Ok(Self {
            config: Arc::new(config),
            lists: Arc::new(Mutex::new(lists)),
            services,
            session,
            search_limiter,
            commands: CommandBus::new(),
            event_tx,
            preprocessor: Arc::new(preprocessor),
            indexes,
            run: RunState::new(run_index),
        })
    }

    /// Replace the index over the output directory
    #[must_use]
    pub fn with_output_index(mut self, index: Arc<dyn FileIndex>) -> Self {
        self.indexes.output = Some(index);
        self
    }

    /// Replace the index over the music library
    #[must_use]
    pub fn with_music_index(mut self, index: Arc<dyn FileIndex>) -> Self {
        self.indexes.music = Some(index);
        self
    }

    /// Subscribe to run events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Command bus the front-end feeds key presses into
    pub fn commands(&self) -> CommandBus {
        self.commands.clone()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// A copy of the track lists in their current state
    pub async fn lists(&self) -> TrackLists {
        self.lists.lock().await.clone()
    }

    /// Run index opened from the configuration, if any
    pub fn run_index(&self) -> Option<Arc<Database>> {
        self.run.run_index.clone()
    }

    /// Whether the user quit from interactive mode
    pub fn quit_requested(&self) -> bool {
        self.run.quit.load(Ordering::SeqCst)
    }

    /// Stop the watchdog
    ///
    /// [`run`](Self::run) calls this on return; it only needs to be called when
    /// a run is abandoned.
    pub fn shutdown(&self) {
        self.run.shutdown.cancel();
    }

    /// Emit an event to all subscribers
    ///
    /// Events are dropped silently when nobody is subscribed.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Log in and start the watchdog, once per run
    pub(crate) async fn ensure_session(&self) -> Result<()> {
        self.run
            .session_started
            .get_or_try_init(|| async {
                if !self.session.is_logged_in() {
                    self.session.login().await?;
                }
                self.spawn_watchdog();
                Ok::<(), crate::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Notify the entry's index and playlist sinks
    ///
    /// Failures are logged; a broken sink never stops the run.
    pub(crate) async fn update_index(&self, entry: usize) {
        let lists = self.lists.lock().await;
        let Some(e) = lists.entries.get(entry) else {
            return;
        };

        if self.config.index.write_index
            && let Some(index) = e.index.clone()
            && let Err(err) = index.update(&lists).await
        {
            tracing::warn!(error = %err, entry, "Failed to update run index");
        }

        if let Some(playlist) = e.playlist.clone()
            && let Err(err) = playlist.update(&lists).await
        {
            tracing::warn!(error = %err, entry, "Failed to update playlist");
        }
    }
}
