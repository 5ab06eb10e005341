//! Single-track download with retries.

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, SearchError};
use crate::services::{DownloadedFile, TransferContext};
use crate::types::{CandidateSet, Event, FailureReason, TrackRef, TrackState};

use super::{BatchDownloader, TrackSlot};

/// How a track task reacts to failure and success
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TrackTaskOptions {
    /// A terminal failure cancels the whole batch
    pub(crate) cancel_on_fail: bool,
    /// Remove the track from its input after downloading
    pub(crate) remove_from_source: bool,
    /// Hand the file to the organizer after downloading
    pub(crate) organize: bool,
}

impl TrackTaskOptions {
    /// Independent tracks: organize and remove each one on success
    pub(crate) fn standalone() -> Self {
        Self {
            cancel_on_fail: false,
            remove_from_source: true,
            organize: true,
        }
    }

    /// Album members: any failure cancels the album
    pub(crate) fn album() -> Self {
        Self {
            cancel_on_fail: true,
            ..Self::default()
        }
    }
}

impl BatchDownloader {
    /// Move a track to `Failed`, emitting an event if it was still open
    pub(crate) async fn fail_track(&self, at: TrackRef, reason: FailureReason) {
        let name = {
            let mut lists = self.lists.lock().await;
            let Some(track) = lists.track_mut(at) else {
                return;
            };
            if !track.fail(reason) {
                return;
            }
            track.display_name(false)
        };
        tracing::info!(track = %name, %reason, "Track failed");
        self.emit_event(Event::TrackFailed { name, reason });
    }

    /// Download one track, retrying unclassified faults
    ///
    /// Returns `Err(Error::Cancelled)` when the batch was cancelled, either from
    /// outside or by this task's own failure under `cancel_on_fail`. Every other
    /// outcome is recorded on the track and returns `Ok`.
    pub(crate) async fn download_track(
        &self,
        at: TrackRef,
        gate: &Semaphore,
        batch: &CancellationToken,
        opts: TrackTaskOptions,
        remote_dir: Option<&str>,
    ) -> Result<()> {
        let (track, item_name) = {
            let lists = self.lists.lock().await;
            let Some(track) = lists.track(at) else {
                return Ok(());
            };
            if track.state() != TrackState::Initial {
                return Ok(());
            }
            (track.clone(), lists.entries[at.entry].item_name.clone())
        };
        let name = track.display_name(false);

        let _permit = tokio::select! {
            biased;
            _ = batch.cancelled() => {
                self.fail_track(at, FailureReason::Other).await;
                return Err(Error::Cancelled);
            }
            permit = gate.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.fail_track(at, FailureReason::Other).await;
                    return Err(Error::Cancelled);
                }
            },
        };

        let mut tries = self.config.download.unknown_error_retries;
        let mut downloaded: Option<DownloadedFile> = None;

        while tries > 0 {
            tokio::select! {
                biased;
                _ = batch.cancelled() => {
                    self.fail_track(at, FailureReason::Other).await;
                    return Err(Error::Cancelled);
                }
                _ = self.session.wait_for_login() => {}
            }

            // The stall clock starts once the search slot is granted
            tokio::select! {
                biased;
                _ = batch.cancelled() => {
                    self.fail_track(at, FailureReason::Other).await;
                    return Err(Error::Cancelled);
                }
                _ = self.search_limiter.acquire() => {}
            }

            let transfer = self.session.register_transfer(name.clone(), batch);
            let ctx = TransferContext {
                cancel: transfer.cancel.clone(),
                progress: transfer.progress.clone(),
                output_dir: self.config.download.output_dir.clone(),
                item_name: item_name.clone(),
                remote_dir: remote_dir.map(str::to_string),
            };
            tracing::debug!(track = %name, tries, "Searching");

            let result = tokio::select! {
                biased;
                _ = batch.cancelled() => Err(SearchError::Cancelled),
                r = self.services.searcher.search_and_download(&track, &ctx) => r,
            };
            drop(transfer);

            match result {
                Ok(file) => {
                    downloaded = Some(file);
                    break;
                }
                Err(e) => {
                    // Faults during an outage are not counted against the track;
                    // the next attempt waits for the session to come back.
                    if !self.session.is_logged_in() {
                        tracing::debug!(track = %name, error = %e, "Attempt failed while disconnected");
                        continue;
                    }

                    if let Some(reason) = e.failure_reason() {
                        self.fail_track(at, reason).await;
                        if opts.cancel_on_fail {
                            batch.cancel();
                            return Err(Error::Cancelled);
                        }
                        break;
                    }

                    if e == SearchError::Cancelled && batch.is_cancelled() {
                        self.fail_track(at, FailureReason::Other).await;
                        return Err(Error::Cancelled);
                    }

                    tracing::warn!(track = %name, error = %e, "Download attempt failed");
                    tries -= 1;
                }
            }
        }

        if tries == 0 {
            tracing::warn!(track = %name, "Out of download retries");
            self.fail_track(at, FailureReason::Other).await;
            if opts.cancel_on_fail {
                batch.cancel();
                return Err(Error::Cancelled);
            }
        }

        if let Some(file) = downloaded {
            self.finish_download(at, &file, opts, remote_dir).await;
        }

        if self.config.has_on_complete() {
            self.on_complete(TrackSlot::Child(at), false).await;
        }

        Ok(())
    }

    async fn finish_download(
        &self,
        at: TrackRef,
        file: &DownloadedFile,
        opts: TrackTaskOptions,
        remote_dir: Option<&str>,
    ) {
        let finished = {
            let mut lists = self.lists.lock().await;
            let Some(track) = lists.track_mut(at) else {
                return;
            };
            if track.candidates.is_none() {
                track.candidates = Some(CandidateSet::single(
                    file.candidate.response.clone(),
                    file.candidate.file.clone(),
                ));
            }
            track.download_path = Some(file.path.clone());
            track.set_state(TrackState::Downloaded);
            track.clone()
        };

        let name = finished.display_name(false);
        tracing::info!(track = %name, path = ?file.path, "Track downloaded");
        self.emit_event(Event::TrackDownloaded {
            name,
            path: file.path.clone(),
        });

        if opts.remove_from_source
            && self.config.download.remove_tracks_from_source
            && let Err(e) = self
                .services
                .source_remover
                .remove_track_from_source(&finished)
                .await
        {
            tracing::warn!(track = %finished, error = %e, "Failed to remove track from source");
        }

        if opts.organize {
            let mut lists = self.lists.lock().await;
            if let Some(track) = lists.track_mut(at)
                && let Err(e) =
                    self.services
                        .organizer
                        .organize_track(track, Some(&file.candidate), remote_dir)
            {
                tracing::warn!(track = %finished, error = %e, "Failed to organize file");
            }
        }
    }
}
