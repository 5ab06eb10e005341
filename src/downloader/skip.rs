//! Skip-existing and skip-not-found gates.
//!
//! Both gates only move tracks out of `Initial`; a track that already reached a
//! terminal state is never reclassified.

use std::path::PathBuf;

use crate::types::{FailureReason, TrackRef, TrackState};

use super::{BatchDownloader, TrackSlot};

impl BatchDownloader {
    /// Build the local file indexes on first use
    ///
    /// A failed build is logged and leaves the index unbuilt, which makes every
    /// lookup miss.
    async fn ensure_indexes_built(&self) {
        for index in [&self.indexes.output, &self.indexes.music]
            .into_iter()
            .flatten()
        {
            if !index.is_built()
                && let Err(e) = index.build().await
            {
                tracing::warn!(error = %e, "Failed to build local file index");
            }
        }
    }

    fn child_slots(lists: &crate::types::TrackLists, entry: usize) -> Vec<TrackSlot> {
        let groups = lists.entries.get(entry).map_or(0, |e| e.list.len());
        (0..groups)
            .flat_map(|group| lists.group_refs(entry, group))
            .map(TrackSlot::Child)
            .collect()
    }

    /// Mark tracks a prior run could not find
    ///
    /// Returns how many tracks were marked.
    async fn mark_not_found_last_time(&self, slots: &[TrackSlot]) -> usize {
        let mut lists = self.lists.lock().await;
        let mut marked = 0;

        for slot in slots {
            let Some(index) = lists.entries.get(slot.entry()).and_then(|e| e.index.clone())
            else {
                continue;
            };
            let Some(track) = slot.get_mut(&mut lists) else {
                continue;
            };
            if track.state() != TrackState::Initial {
                continue;
            }
            let Some(previous) = index.previous_result(track) else {
                continue;
            };

            if (previous.failure_reason() == FailureReason::NoSuitableFileFound
                || previous.state() == TrackState::NotFoundLastTime)
                && track.set_state(TrackState::NotFoundLastTime)
            {
                tracing::debug!(track = %track, "Not found in a previous run");
                marked += 1;
            }
        }

        marked
    }

    /// Mark tracks found in the local file indexes
    ///
    /// The output directory index is consulted first, then the music library.
    /// Returns how many tracks were marked.
    async fn mark_existing(&self, slots: &[TrackSlot]) -> usize {
        if self.indexes.output.is_none() && self.indexes.music.is_none() {
            return 0;
        }
        self.ensure_indexes_built().await;

        let mut lists = self.lists.lock().await;
        let mut marked = 0;

        for slot in slots {
            let Some(track) = slot.get_mut(&mut lists) else {
                continue;
            };
            if track.state() != TrackState::Initial {
                continue;
            }

            let found: Option<PathBuf> = [&self.indexes.output, &self.indexes.music]
                .into_iter()
                .flatten()
                .find_map(|index| index.track_exists(track));

            if let Some(path) = found
                && track.set_state(TrackState::AlreadyExists)
            {
                tracing::debug!(track = %track, path = ?path, "Already exists");
                track.download_path = Some(path);
                marked += 1;
            }
        }

        marked
    }

    /// Run the skip-not-found gate over an item
    ///
    /// The source is checked when it may be skipped. Children are checked when
    /// the source was not marked and no source search is pending. A marked
    /// source also marks its children when the entry asks for it.
    ///
    /// Returns the number of children marked.
    pub(crate) async fn apply_skip_not_found(&self, entry: usize) -> usize {
        let (can_skip_source, need_search, marks_children) = {
            let lists = self.lists.lock().await;
            let Some(e) = lists.entries.get(entry) else {
                return 0;
            };
            (
                e.source_can_be_skipped,
                e.need_source_search,
                e.not_found_marks_children,
            )
        };

        let source_marked = can_skip_source
            && self
                .mark_not_found_last_time(&[TrackSlot::Source(entry)])
                .await
                > 0;

        if source_marked {
            if !marks_children {
                return 0;
            }
            let mut lists = self.lists.lock().await;
            let mut marked = 0;
            for slot in Self::child_slots(&lists, entry) {
                if let Some(track) = slot.get_mut(&mut lists)
                    && track.set_state(TrackState::NotFoundLastTime)
                {
                    marked += 1;
                }
            }
            return marked;
        }

        if need_search {
            return 0;
        }

        let slots = {
            let lists = self.lists.lock().await;
            Self::child_slots(&lists, entry)
        };
        self.mark_not_found_last_time(&slots).await
    }

    /// Run the skip-existing gate over an item
    ///
    /// Skipped entirely when the source was marked not found. Children are only
    /// checked once they are known (no pending source search) and when the
    /// source itself was not found locally.
    ///
    /// Returns the number of children marked.
    pub(crate) async fn apply_skip_existing(&self, entry: usize) -> usize {
        let (can_skip_source, need_search, source_state) = {
            let lists = self.lists.lock().await;
            let Some(e) = lists.entries.get(entry) else {
                return 0;
            };
            (
                e.source_can_be_skipped,
                e.need_source_search,
                e.source.state(),
            )
        };

        if source_state == TrackState::NotFoundLastTime {
            return 0;
        }

        if can_skip_source
            && self.mark_existing(&[TrackSlot::Source(entry)]).await > 0
        {
            return 0;
        }

        if need_search {
            return 0;
        }

        self.apply_skip_existing_to_children(entry).await
    }

    /// Check every known child against the local indexes
    pub(crate) async fn apply_skip_existing_to_children(&self, entry: usize) -> usize {
        let slots = {
            let lists = self.lists.lock().await;
            Self::child_slots(&lists, entry)
        };
        self.mark_existing(&slots).await
    }

    /// Children of an entry that are not yet satisfied, in order
    pub(crate) async fn pending_tracks(&self, entry: usize) -> Vec<TrackRef> {
        let lists = self.lists.lock().await;
        let Some(e) = lists.entries.get(entry) else {
            return Vec::new();
        };
        (0..e.list.len())
            .flat_map(|group| lists.group_refs(entry, group))
            .filter(|at| {
                lists
                    .track(*at)
                    .is_some_and(|t| t.state() == TrackState::Initial)
            })
            .collect()
    }
}
