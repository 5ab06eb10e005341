//! All-or-nothing album downloads.
//!
//! An album item tries its candidate groups in order (or as the user picks
//! them). Every track of a group shares one cancellation token, so the first
//! hard failure aborts the rest of the group. A failed or cancelled group is
//! cleaned up and dropped; the next one is tried until one succeeds or none
//! are left.

use std::sync::atomic::Ordering;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::commands::UserCommand;
use crate::config::AlbumFailAction;
use crate::error::Result;
use crate::types::{Event, FailureReason, Track, TrackRef, TrackState};
use crate::utils::{greatest_common_dir, greatest_common_remote_dir};

use super::interactive::Selection;
use super::track_task::TrackTaskOptions;
use super::{BatchDownloader, TrackSlot};

/// Result of downloading one candidate group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BatchOutcome {
    /// Every track downloaded
    Succeeded,
    /// The batch token fired
    Cancelled {
        /// The user pressed the cancel key
        user_initiated: bool,
    },
}

impl BatchDownloader {
    /// Run track tasks over a set of tracks, waiting for all of them
    ///
    /// Returns `Err(Cancelled)` if any task propagated cancellation.
    pub(crate) async fn run_tracks(
        &self,
        refs: &[TrackRef],
        gate: &Semaphore,
        batch: &CancellationToken,
        opts: TrackTaskOptions,
        remote_dir: Option<&str>,
    ) -> Result<()> {
        let results = join_all(
            refs.iter()
                .map(|at| self.download_track(*at, gate, batch, opts, remote_dir)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// Common remote directory of the tracks' first candidates
    pub(crate) async fn remote_dir_of(&self, refs: &[TrackRef]) -> String {
        let lists = self.lists.lock().await;
        let names: Vec<String> = refs
            .iter()
            .filter_map(|at| lists.track(*at))
            .filter_map(Track::first_candidate)
            .map(|c| c.file.filename)
            .collect();
        greatest_common_remote_dir(names.iter().map(String::as_str))
    }

    /// Run a future while listening for the user's cancel key
    ///
    /// A cancel command fires `batch`. Returns the future's output and whether
    /// the user cancelled.
    pub(crate) async fn with_cancel_key<F, T>(&self, batch: &CancellationToken, work: F) -> (T, bool)
    where
        F: std::future::Future<Output = T>,
    {
        let mut listener = self.commands.listen();
        let mut user_cancelled = false;
        tokio::pin!(work);

        let output = loop {
            tokio::select! {
                out = &mut work => break out,
                cmd = listener.recv() => match cmd {
                    Some(UserCommand::Cancel) => {
                        tracing::info!("Cancel requested");
                        user_cancelled = true;
                        batch.cancel();
                    }
                    None => break (&mut work).await,
                },
            }
        };

        (output, user_cancelled)
    }

    /// Download one candidate group, then complete its folder if asked
    async fn download_album_group(
        &self,
        entry: usize,
        group: usize,
        refs: &mut Vec<TrackRef>,
        retrieve_folder: bool,
    ) -> BatchOutcome {
        let remote_dir = self.remote_dir_of(refs.as_slice()).await;
        let permits = self
            .config
            .album
            .album_concurrency
            .unwrap_or(Semaphore::MAX_PERMITS);
        let gate = Semaphore::new(permits);
        let batch = CancellationToken::new();

        let work = async {
            self.run_tracks(refs.as_slice(), &gate, &batch, TrackTaskOptions::album(), Some(&remote_dir))
                .await?;

            let username = {
                let lists = self.lists.lock().await;
                refs.iter()
                    .filter_map(|at| lists.track(*at))
                    .find_map(Track::first_candidate)
                    .map(|c| c.response.username)
            };

            if retrieve_folder
                && let Some(username) = username
                && !self.folder_retrieved(&username, &remote_dir)
            {
                tracing::info!(folder = %remote_dir, "Getting all files in folder");
                if let Some(added) = self.complete_folder_once(entry, group, &remote_dir).await
                    && added > 0
                {
                    *refs = self.lists.lock().await.group_refs(entry, group);
                    self.run_tracks(refs.as_slice(), &gate, &batch, TrackTaskOptions::album(), Some(&remote_dir))
                        .await?;
                }
            }
            Ok::<(), crate::Error>(())
        };

        let (result, user_initiated) = self.with_cancel_key(&batch, work).await;
        match result {
            Ok(()) => BatchOutcome::Succeeded,
            Err(_) => BatchOutcome::Cancelled { user_initiated },
        }
    }

    /// Clean up after a cancelled album group
    async fn handle_album_cancel(&self, entry: usize, refs: &[TrackRef], user_initiated: bool) {
        let action = self.config.album.fail_action;

        if !user_initiated {
            self.on_album_fail(refs, action).await;
            return;
        }

        if !self.downloaded_paths(refs).await.is_empty() {
            let default_label = match action {
                AlbumFailAction::Delete => "Yes".to_string(),
                AlbumFailAction::Ignore => "No".to_string(),
                AlbumFailAction::Quarantine => {
                    format!("Move to {}", self.config.failed_album_path().display())
                }
            };
            let prompt = format!("Delete files? [Y/n] (default: {}): ", default_label);
            let answer = self
                .services
                .interaction
                .read_line(&prompt)
                .await
                .map(|a| a.trim().to_lowercase());

            match answer.as_deref() {
                Some("y") => self.on_album_fail(refs, AlbumFailAction::Delete).await,
                Some("") | None => self.on_album_fail(refs, action).await,
                _ => {}
            }
        }

        if self.config.album.enter_interactive_on_cancel && !self.is_interactive(entry).await {
            tracing::info!("Entering interactive mode");
            self.enter_interactive(entry).await;
        }
    }

    /// Download an album item
    pub(crate) async fn download_album(&self, entry: usize) {
        let (name, group_count) = {
            let lists = self.lists.lock().await;
            let Some(e) = lists.entries.get(entry) else {
                return;
            };
            (e.source.display_name(true), e.list.len())
        };
        let browse_folder = self.config.album.browse_folder;
        let album_art_only = self.config.album.album_art_only;

        let mut remaining: Vec<Vec<TrackRef>> = {
            let lists = self.lists.lock().await;
            (0..group_count)
                .map(|group| lists.group_refs(entry, group))
                .collect()
        };
        let mut failed_groups: Vec<usize> = Vec::new();
        let mut chosen: Option<Vec<TrackRef>> = None;
        let mut skipped = false;

        while !remaining.is_empty() && !album_art_only {
            let selection = if self.is_interactive(entry).await {
                self.interactive_select(entry, &mut remaining, browse_folder)
                    .await
            } else {
                Selection::Accept {
                    position: 0,
                    refs: remaining[0].clone(),
                    retrieve_folder: browse_folder,
                }
            };

            let (position, mut refs, retrieve_folder) = match selection {
                Selection::Accept {
                    position,
                    refs,
                    retrieve_folder,
                } => (position, refs, retrieve_folder),
                Selection::Skip => {
                    skipped = true;
                    break;
                }
                Selection::Quit => {
                    self.run.quit.store(true, Ordering::SeqCst);
                    skipped = true;
                    break;
                }
            };

            let Some(group) = refs.first().map(|at| at.group) else {
                remaining.remove(position);
                continue;
            };

            tracing::info!(album = %name, group, tracks = refs.len(), "Downloading album");

            match self
                .download_album_group(entry, group, &mut refs, retrieve_folder)
                .await
            {
                BatchOutcome::Succeeded => {
                    chosen = Some(refs);
                    break;
                }
                BatchOutcome::Cancelled { user_initiated } => {
                    tracing::info!(album = %name, user_initiated, "Album download cancelled");
                    self.emit_event(Event::AlbumCancelled {
                        name: name.clone(),
                        user_initiated,
                    });
                    self.handle_album_cancel(entry, &refs, user_initiated).await;
                }
            }

            remaining.remove(position);
            failed_groups.push(group);
        }

        let chosen = self.drop_failed_groups(entry, &failed_groups, chosen).await;
        let succeeded = chosen.is_some();

        if let Some(refs) = &chosen {
            self.finish_album(entry, &name, refs).await;
        } else if !skipped && !album_art_only {
            {
                let mut lists = self.lists.lock().await;
                if let Some(e) = lists.entries.get_mut(entry) {
                    e.source.fail(FailureReason::AllDownloadsFailed);
                }
            }
            tracing::error!(album = %name, "Failed to download album");
            self.emit_event(Event::AlbumFailed { name: name.clone() });
        }

        let mut images = Vec::new();
        if album_art_only
            || (succeeded && self.config.album.album_art != crate::config::AlbumArtOption::Default)
        {
            let reference = match &chosen {
                Some(refs) => Some(refs.clone()),
                None => {
                    let lists = self.lists.lock().await;
                    lists
                        .entries
                        .get(entry)
                        .filter(|e| !e.list.is_empty())
                        .map(|_| lists.group_refs(entry, 0))
                }
            };
            images = self.download_images(entry, reference.as_deref()).await;
        }

        if let Some(refs) = &chosen {
            self.organize_album(entry, refs, &images).await;
        }

        self.update_index(entry).await;

        if self.config.has_on_complete() {
            self.on_complete(TrackSlot::Source(entry), true).await;
        }
    }

    /// Remove failed groups from the entry and remap the chosen refs
    async fn drop_failed_groups(
        &self,
        entry: usize,
        failed_groups: &[usize],
        chosen: Option<Vec<TrackRef>>,
    ) -> Option<Vec<TrackRef>> {
        if failed_groups.is_empty() {
            return chosen;
        }

        let mut lists = self.lists.lock().await;
        if let Some(e) = lists.entries.get_mut(entry) {
            let mut sorted = failed_groups.to_vec();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            for group in sorted {
                if group < e.list.len() {
                    e.list.remove(group);
                }
            }
        }

        chosen.map(|refs| {
            refs.into_iter()
                .map(|at| TrackRef {
                    group: at.group - failed_groups.iter().filter(|g| **g < at.group).count(),
                    ..at
                })
                .collect()
        })
    }

    /// Mark the source downloaded and record its directory
    async fn finish_album(&self, entry: usize, name: &str, refs: &[TrackRef]) {
        let (source, path) = {
            let mut lists = self.lists.lock().await;
            let audio: Vec<std::path::PathBuf> = refs
                .iter()
                .filter_map(|at| lists.track(*at))
                .filter(|t| !t.is_not_audio && t.state() == TrackState::Downloaded)
                .filter_map(|t| t.download_path.clone())
                .collect();
            let path = greatest_common_dir(audio.iter().map(|p| p.as_path()));

            let Some(e) = lists.entries.get_mut(entry) else {
                return;
            };
            e.source.set_state(TrackState::Downloaded);
            if path.is_some() {
                e.source.download_path = path.clone();
            }
            (e.source.clone(), path)
        };

        tracing::info!(album = %name, path = ?path, "Album downloaded");
        self.emit_event(Event::AlbumDownloaded {
            name: name.to_string(),
            path: path.clone(),
        });

        if path.is_some()
            && self.config.download.remove_tracks_from_source
            && let Err(e) = self
                .services
                .source_remover
                .remove_track_from_source(&source)
                .await
        {
            tracing::warn!(album = %name, error = %e, "Failed to remove album from source");
        }
    }

    /// Hand the album and its extra images to the organizer
    async fn organize_album(&self, entry: usize, refs: &[TrackRef], images: &[TrackRef]) {
        let mut lists = self.lists.lock().await;
        let Some(source) = lists.entries.get(entry).map(|e| e.source.clone()) else {
            return;
        };
        if source.download_path.is_none() {
            return;
        }

        let (all, mut tracks): (Vec<TrackRef>, Vec<Track>) = refs
            .iter()
            .chain(images)
            .filter_map(|at| lists.track(*at).map(|t| (*at, t.clone())))
            .unzip();

        if let Err(e) = self.services.organizer.organize_album(&source, &mut tracks) {
            tracing::warn!(album = %source, error = %e, "Failed to organize album");
            return;
        }

        for (at, organized) in all.iter().zip(tracks) {
            if let Some(track) = lists.track_mut(*at) {
                track.download_path = organized.download_path;
            }
        }
    }
}
