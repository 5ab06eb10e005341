//! Per-item main loop and parallel source searches.
//!
//! Items are processed in order. The list may grow while the run is underway:
//! an album-aggregate search appends one album item per distinct album found,
//! and those are picked up by the same loop.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{Event, FailureReason, RunSummary, TrackListEntry, TrackState, TrackType};

use super::BatchDownloader;
use super::track_task::TrackTaskOptions;

/// Source search started ahead of its item's download
type PendingSearch = (usize, JoinHandle<Result<bool>>);

/// Snapshot of the fields the loop branches on
struct ItemView {
    name: String,
    kind: TrackType,
    source_state: TrackState,
    source_can_be_skipped: bool,
    need_source_search: bool,
    can_parallel_search: bool,
}

impl BatchDownloader {
    /// Process every item and return the outcome counts
    ///
    /// The watchdog is stopped before returning. Only a failed login ends the
    /// run early; per-item failures are recorded on the tracks.
    pub async fn run(&self) -> Result<RunSummary> {
        let result = self.run_items().await;
        self.shutdown();
        let summary = result?;

        if !self.config.does_not_download() && !self.quit_requested() {
            tracing::info!(
                downloaded = summary.downloaded,
                already_exist = summary.already_exist,
                not_found_last_time = summary.not_found_last_time,
                failed = summary.failed,
                "Run complete"
            );
            for name in &summary.failed_tracks {
                tracing::info!(track = %name, "Failed");
            }
            self.emit_event(Event::RunComplete {
                summary: summary.clone(),
            });
        }

        Ok(summary)
    }

    async fn run_items(&self) -> Result<RunSummary> {
        let enable_parallel = {
            let lists = self.lists.lock().await;
            self.config.download.parallel_album_search
                && !self.config.download.print_tracks
                && lists.entries.iter().any(TrackListEntry::can_parallel_search)
        };
        let parallel_gate = Arc::new(Semaphore::new(
            self.config.download.parallel_album_search_processes,
        ));
        let mut pending: Vec<PendingSearch> = Vec::new();

        let mut entry = 0;
        while !self.quit_requested() {
            if entry >= self.lists.lock().await.len() {
                break;
            }
            self.process_item(entry, enable_parallel, &parallel_gate, &mut pending)
                .await?;
            entry += 1;
        }

        if !pending.is_empty() && !self.quit_requested() {
            self.flush_parallel_searches(&mut pending).await?;
        }

        let lists = self.lists.lock().await;
        Ok(RunSummary::from_lists(&lists))
    }

    async fn item_view(&self, entry: usize) -> Option<ItemView> {
        let lists = self.lists.lock().await;
        lists.entries.get(entry).map(|e| ItemView {
            name: e.item_name_or_source(),
            kind: e.source.kind,
            source_state: e.source.state(),
            source_can_be_skipped: e.source_can_be_skipped,
            need_source_search: e.need_source_search,
            can_parallel_search: e.can_parallel_search(),
        })
    }

    async fn process_item(
        &self,
        entry: usize,
        enable_parallel: bool,
        parallel_gate: &Arc<Semaphore>,
        pending: &mut Vec<PendingSearch>,
    ) -> Result<()> {
        let Some(item) = self.item_view(entry).await else {
            return Ok(());
        };
        tracing::info!(item = %item.name, kind = %item.kind, index = entry, "Processing item");
        self.emit_event(Event::ItemStarted {
            index: entry,
            name: item.name.clone(),
            kind: item.kind,
        });

        self.preprocess_entry(entry).await;

        if self.config.skip.skip_not_found {
            let marked = self.apply_skip_not_found(entry).await;
            tracing::debug!(item = %item.name, marked, "Skip-not-found applied");
        }
        if self.config.skip.skip_existing {
            let marked = self.apply_skip_existing(entry).await;
            tracing::debug!(item = %item.name, marked, "Skip-existing applied");
        }

        if self.config.download.print_tracks {
            self.plan_item(entry).await;
            return Ok(());
        }

        // The gates may have just moved the source
        let Some(item) = self.item_view(entry).await else {
            return Ok(());
        };

        if item.source_can_be_skipped
            && matches!(
                item.source_state,
                TrackState::AlreadyExists | TrackState::NotFoundLastTime
            )
        {
            tracing::info!(item = %item.name, state = ?item.source_state, "Skipping item");
            self.emit_event(Event::ItemSkipped {
                index: entry,
                name: item.name,
                state: item.source_state,
            });
            self.update_index(entry).await;
            return Ok(());
        }

        if item.need_source_search {
            self.ensure_session().await?;

            if enable_parallel && item.can_parallel_search {
                let this = self.clone();
                let gate = Arc::clone(parallel_gate);
                let handle = tokio::spawn(async move {
                    let _permit = gate.acquire_owned().await;
                    this.search_source(entry).await
                });
                pending.push((entry, handle));
                return Ok(());
            }

            match self.search_source(entry).await {
                Ok(found) => {
                    if !self.after_source_search(entry, found).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    self.fail_source_search(entry, &item.name, &e.to_string())
                        .await;
                    return Ok(());
                }
            }
        }

        if !pending.is_empty() {
            self.flush_parallel_searches(pending).await?;
        }

        self.download(entry).await
    }

    /// Emit the tracks an item would download, without downloading
    async fn plan_item(&self, entry: usize) {
        let planned = self.pending_tracks(entry).await;
        let event = {
            let lists = self.lists.lock().await;
            let Some(e) = lists.entries.get(entry) else {
                return;
            };

            let tracks: Vec<String> = if e.source.kind == TrackType::Normal {
                planned
                    .iter()
                    .filter_map(|at| lists.track(*at))
                    .map(|t| t.display_name(false))
                    .collect()
            } else if e.source.state() == TrackState::Initial {
                vec![e.source.display_name(false)]
            } else {
                Vec::new()
            };

            let all = std::iter::once(&e.source).chain(e.list.iter().flatten());
            let (existing, not_found) = all.fold((0, 0), |(x, n), t| match t.state() {
                TrackState::AlreadyExists => (x + 1, n),
                TrackState::NotFoundLastTime => (x, n + 1),
                _ => (x, n),
            });

            tracing::info!(
                item = %e.item_name_or_source(),
                planned = tracks.len(),
                existing,
                not_found,
                "Tracks to download"
            );
            Event::TracksPlanned {
                index: entry,
                tracks,
                existing,
                not_found,
            }
        };
        self.emit_event(event);
    }

    /// Search for an item's candidates
    ///
    /// Returns whether anything was found. Album-aggregate results become new
    /// album items appended to the list.
    pub(crate) async fn search_source(&self, entry: usize) -> Result<bool> {
        let source = {
            let lists = self.lists.lock().await;
            match lists.entries.get(entry) {
                Some(e) => e.source.clone(),
                None => return Ok(false),
            }
        };
        let name = source.display_name(true);

        let _search = self.session.begin_search(name.clone());
        self.search_limiter.acquire().await;
        tracing::info!(item = %name, kind = %source.kind, "Searching");

        let searcher = &self.services.searcher;
        let found = match source.kind {
            TrackType::Album => {
                let groups = searcher.album_candidates(&source).await?;
                let found = groups.first().is_some_and(|g| !g.is_empty());
                let mut lists = self.lists.lock().await;
                if let Some(e) = lists.entries.get_mut(entry) {
                    e.list = groups;
                }
                found
            }
            TrackType::Aggregate => {
                let tracks = searcher.aggregate_tracks(&source).await?;
                let found = !tracks.is_empty();
                let mut lists = self.lists.lock().await;
                if let Some(e) = lists.entries.get_mut(entry) {
                    e.list.insert(0, tracks);
                }
                found
            }
            TrackType::AlbumAggregate => {
                let albums = searcher.aggregate_albums(&source).await?;
                let found = !albums.is_empty();
                let mut lists = self.lists.lock().await;
                let Some(parent) = lists.entries.get(entry) else {
                    return Ok(false);
                };
                let (interactive, item_name, index, playlist) = (
                    parent.interactive,
                    parent.item_name.clone(),
                    parent.index.clone(),
                    parent.playlist.clone(),
                );

                let count = albums.len();
                for groups in albums {
                    let mut album_source = source.clone();
                    album_source.kind = TrackType::Album;
                    album_source.item_number = None;

                    let mut album = TrackListEntry::with_list(groups, album_source);
                    album.need_source_search = false;
                    album.source_can_be_skipped = true;
                    album.preprocess = false;
                    album.interactive = interactive;
                    album.item_name = item_name.clone();
                    album.index = index.clone();
                    album.playlist = playlist.clone();
                    lists.add_entry(album);
                }
                tracing::info!(item = %name, albums = count, "Queued aggregate albums");
                found
            }
            TrackType::Normal => true,
        };

        let groups = {
            let mut lists = self.lists.lock().await;
            match lists.entries.get_mut(entry) {
                Some(e) => {
                    e.need_source_search = false;
                    e.list.len()
                }
                None => 0,
            }
        };

        self.emit_event(Event::SearchFinished {
            index: entry,
            name,
            groups,
        });
        Ok(found)
    }

    /// Record the outcome of a source search
    ///
    /// Returns whether the item should go on to download.
    async fn after_source_search(&self, entry: usize, found: bool) -> bool {
        let (name, skip_existing_after, goto_next) = {
            let mut lists = self.lists.lock().await;
            let Some(e) = lists.entries.get_mut(entry) else {
                return false;
            };
            if !found {
                e.source.fail(FailureReason::NoSuitableFileFound);
            }
            (
                e.source.display_name(true),
                e.need_skip_existing_after_search,
                e.goto_next_after_search,
            )
        };

        if !found {
            tracing::info!(item = %name, "No results");
            self.update_index(entry).await;
            return false;
        }

        if self.config.skip.skip_existing && skip_existing_after {
            let marked = self.apply_skip_existing_to_children(entry).await;
            tracing::debug!(item = %name, marked, "Skip-existing applied after search");
        }

        !goto_next
    }

    async fn fail_source_search(&self, entry: usize, name: &str, error: &str) {
        tracing::error!(item = %name, error = %error, "Search failed");
        {
            let mut lists = self.lists.lock().await;
            if let Some(e) = lists.entries.get_mut(entry) {
                e.source.fail(FailureReason::Other);
            }
        }
        self.update_index(entry).await;
    }

    /// Wait for the searches started ahead and download their items in order
    async fn flush_parallel_searches(&self, pending: &mut Vec<PendingSearch>) -> Result<()> {
        for (entry, handle) in std::mem::take(pending) {
            if self.quit_requested() {
                handle.abort();
                continue;
            }

            let name = match self.item_view(entry).await {
                Some(item) => item.name,
                None => continue,
            };

            let found = match handle.await {
                Ok(Ok(found)) => found,
                Ok(Err(e)) => {
                    self.fail_source_search(entry, &name, &e.to_string()).await;
                    continue;
                }
                Err(e) => {
                    self.fail_source_search(entry, &name, &e.to_string()).await;
                    continue;
                }
            };

            if self.after_source_search(entry, found).await {
                tracing::info!(item = %name, "Downloading");
                self.download(entry).await?;
            }
        }
        Ok(())
    }

    /// Download the tracks of an item
    async fn download(&self, entry: usize) -> Result<()> {
        self.update_index(entry).await;

        let (kind, satisfied, total) = {
            let lists = self.lists.lock().await;
            let Some(e) = lists.entries.get(entry) else {
                return Ok(());
            };
            let satisfied = e
                .list
                .iter()
                .flatten()
                .filter(|t| {
                    matches!(
                        t.state(),
                        TrackState::AlreadyExists | TrackState::NotFoundLastTime
                    )
                })
                .count();
            (e.source.kind, satisfied, e.track_count())
        };

        if satisfied >= total {
            tracing::debug!(entry, total, "Nothing left to download");
            return Ok(());
        }

        self.ensure_session().await?;

        match kind {
            TrackType::Normal | TrackType::Aggregate => self.download_normal(entry).await,
            TrackType::Album => self.download_album(entry).await,
            TrackType::AlbumAggregate => {}
        }
        Ok(())
    }

    /// Download independent tracks, each with its own cancellation token
    async fn download_normal(&self, entry: usize) {
        let (refs, kind) = {
            let lists = self.lists.lock().await;
            let Some(e) = lists.entries.get(entry) else {
                return;
            };
            let refs = if e.list.is_empty() {
                Vec::new()
            } else {
                lists.group_refs(entry, 0)
            };
            (refs, e.source.kind)
        };

        let gate = Semaphore::new(self.config.download.concurrent_downloads);
        tracing::info!(entry, tracks = refs.len(), "Downloading tracks");

        let results = join_all(refs.iter().map(|at| {
            let gate = &gate;
            async move {
                let token = CancellationToken::new();
                let result = self
                    .download_track(*at, gate, &token, TrackTaskOptions::standalone(), None)
                    .await;
                self.update_index(entry).await;
                result
            }
        }))
        .await;

        for result in results {
            if let Err(e) = result {
                tracing::debug!(entry, error = %e, "Track task ended early");
            }
        }

        let (all_satisfied, source) = {
            let lists = self.lists.lock().await;
            let all = refs
                .iter()
                .filter_map(|at| lists.track(*at))
                .all(|t| t.state().is_satisfied());
            (all, lists.entries.get(entry).map(|e| e.source.clone()))
        };

        // A plain item's source is either the track itself or a placeholder
        if all_satisfied
            && kind != TrackType::Normal
            && self.config.download.remove_tracks_from_source
            && let Some(source) = source
            && let Err(e) = self
                .services
                .source_remover
                .remove_track_from_source(&source)
                .await
        {
            tracing::warn!(item = %source, error = %e, "Failed to remove item from source");
        }
    }
}
