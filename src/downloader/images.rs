//! Album art selection and download.

use std::sync::atomic::Ordering;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::{AlbumArtOption, AlbumFailAction};
use crate::types::{Track, TrackLists, TrackRef, TrackState};
use crate::utils::is_image_file;

use super::BatchDownloader;
use super::interactive::Selection;
use super::track_task::TrackTaskOptions;

/// Slack allowed when comparing image sizes under [`AlbumArtOption::Largest`]
const LARGEST_IMAGE_SLACK: u64 = 50 * 1024;

fn is_image(track: &Track) -> bool {
    track
        .first_candidate()
        .is_some_and(|c| is_image_file(&c.file.filename))
}

fn track_length(track: &Track) -> u32 {
    track
        .length
        .or_else(|| track.first_candidate().and_then(|c| c.file.length))
        .unwrap_or(0)
}

fn candidate_size(track: &Track) -> u64 {
    track.first_candidate().map_or(0, |c| c.file.size)
}

/// Sorted lengths of the audio tracks, `None` when there are none
pub(crate) fn sorted_audio_lengths(tracks: &[Track]) -> Option<Vec<u32>> {
    let mut lengths: Vec<u32> = tracks
        .iter()
        .filter(|t| !t.is_not_audio && !is_image(t))
        .map(track_length)
        .collect();
    if lengths.is_empty() {
        return None;
    }
    lengths.sort_unstable();
    Some(lengths)
}

/// Whether a candidate group plausibly is the same release as `reference`
///
/// Both must have the same number of audio tracks and, pairwise after sorting,
/// lengths within `tolerance` seconds.
pub(crate) fn albums_are_similar(reference: &[u32], group: &[Track], tolerance: u32) -> bool {
    let Some(lengths) = sorted_audio_lengths(group) else {
        return false;
    };
    lengths.len() == reference.len()
        && lengths
            .iter()
            .zip(reference)
            .all(|(a, b)| a.abs_diff(*b) <= tolerance)
}

fn rank_key(option: AlbumArtOption, tracks: &[&Track]) -> (u64, u64, u64) {
    let max_size = tracks.iter().map(|t| candidate_size(t)).max().unwrap_or(0);
    let total_size: u64 = tracks.iter().map(|t| candidate_size(t)).sum();
    let upload_speed = tracks
        .first()
        .and_then(|t| t.first_candidate())
        .map_or(0, |c| c.response.upload_speed);

    let primary = match option {
        AlbumArtOption::Most => tracks.len() as u64,
        _ => max_size / 1024 / 100,
    };
    (primary, upload_speed / 1024 / 300, total_size / 1024 / 100)
}

fn resolve<'a>(lists: &'a TrackLists, refs: &[TrackRef]) -> Vec<&'a Track> {
    refs.iter().filter_map(|at| lists.track(*at)).collect()
}

impl BatchDownloader {
    /// Image groups worth considering, best first
    async fn rank_image_groups(
        &self,
        entry: usize,
        chosen: Option<&[TrackRef]>,
    ) -> (Vec<Vec<TrackRef>>, u64, usize) {
        let option = self.config.album.album_art;
        let tolerance = self.config.album.length_tolerance;
        let lists = self.lists.lock().await;
        let Some(e) = lists.entries.get(entry) else {
            return (Vec::new(), 0, 0);
        };

        let chosen_tracks: Vec<Track> = chosen
            .map(|refs| resolve(&lists, refs).into_iter().cloned().collect())
            .unwrap_or_default();
        let reference = sorted_audio_lengths(&chosen_tracks);

        let mut keyed: Vec<((u64, u64, u64), Vec<TrackRef>)> = (0..e.list.len())
            .filter(|g| match &reference {
                Some(lengths) => albums_are_similar(lengths, &e.list[*g], tolerance),
                None => true,
            })
            .map(|g| {
                lists
                    .group_refs(entry, g)
                    .into_iter()
                    .filter(|at| lists.track(*at).is_some_and(is_image))
                    .collect::<Vec<_>>()
            })
            .filter(|refs| !refs.is_empty())
            .map(|refs| (rank_key(option, &resolve(&lists, &refs)), refs))
            .collect();
        keyed.sort_by(|a, b| b.0.cmp(&a.0));

        let have: Vec<&Track> = chosen_tracks
            .iter()
            .filter(|t| {
                t.state() == TrackState::Downloaded
                    && t.download_path
                        .as_ref()
                        .is_some_and(|p| is_image_file(&p.to_string_lossy()))
            })
            .collect();
        let have_size = have.iter().map(|t| candidate_size(t)).max().unwrap_or(0);

        (
            keyed.into_iter().map(|(_, refs)| refs).collect(),
            have_size,
            have.len(),
        )
    }

    fn needs_image_download(
        &self,
        tracks: &[&Track],
        have_size: u64,
        have_count: usize,
    ) -> bool {
        if tracks.iter().all(|t| t.state().is_satisfied()) {
            return false;
        }
        match self.config.album.album_art {
            AlbumArtOption::Most => have_count < tracks.len(),
            AlbumArtOption::Largest => {
                let best = tracks.iter().map(|t| candidate_size(t)).max().unwrap_or(0);
                have_size < best.saturating_sub(LARGEST_IMAGE_SLACK)
            }
            AlbumArtOption::Default => true,
        }
    }

    /// Download extra images for an album
    ///
    /// Candidate image groups come from every group of the entry similar to the
    /// `chosen` album. Images download one at a time and never cancel each
    /// other. Returns the images downloaded.
    pub(crate) async fn download_images(
        &self,
        entry: usize,
        chosen: Option<&[TrackRef]>,
    ) -> Vec<TrackRef> {
        let mut downloaded: Vec<TrackRef> = Vec::new();
        if self.config.album.album_art == AlbumArtOption::Default {
            return downloaded;
        }

        let interaction = self.services.interaction.clone();
        let (mut groups, have_size, have_count) = self.rank_image_groups(entry, chosen).await;

        if groups.is_empty() {
            interaction.message("No images found");
            return downloaded;
        }
        if groups.len() == 1 {
            let lists = self.lists.lock().await;
            if resolve(&lists, &groups[0])
                .iter()
                .all(|t| t.state() != TrackState::Initial)
            {
                interaction.message("No additional images found");
                return downloaded;
            }
        }

        while !groups.is_empty() {
            let selection = if self.is_interactive(entry).await {
                self.interactive_select(entry, &mut groups, false).await
            } else {
                Selection::Accept {
                    position: 0,
                    refs: groups[0].clone(),
                    retrieve_folder: false,
                }
            };

            let (position, refs) = match selection {
                Selection::Accept { position, refs, .. } => (position, refs),
                Selection::Skip => break,
                Selection::Quit => {
                    self.run.quit.store(true, Ordering::SeqCst);
                    break;
                }
            };
            groups.remove(position);

            let needed = {
                let lists = self.lists.lock().await;
                self.needs_image_download(&resolve(&lists, &refs), have_size, have_count)
            };
            if !needed {
                interaction.message("Image requirements already satisfied");
                return downloaded;
            }

            tracing::info!(images = refs.len(), "Downloading additional images");

            let gate = Semaphore::new(1);
            let batch = CancellationToken::new();
            let work = async {
                for at in &refs {
                    self.download_track(*at, &gate, &batch, TrackTaskOptions::default(), None)
                        .await?;
                }
                Ok::<(), crate::Error>(())
            };
            let (result, user_cancelled) = self.with_cancel_key(&batch, work).await;

            if result.is_err() {
                if !user_cancelled {
                    tracing::warn!("Image download cancelled");
                    break;
                }

                if !self.downloaded_paths(&refs).await.is_empty() {
                    let answer = interaction
                        .read_line("Delete files? [Y/n] (default: Yes): ")
                        .await
                        .map(|a| a.trim().to_lowercase());
                    if matches!(answer.as_deref(), Some("y") | Some("") | None) {
                        self.on_album_fail(&refs, AlbumFailAction::Delete).await;
                        continue;
                    }
                }
                if !self.is_interactive(entry).await {
                    tracing::info!("Entering interactive mode");
                    self.enter_interactive(entry).await;
                }
                continue;
            }

            let all_succeeded = {
                let lists = self.lists.lock().await;
                let tracks = resolve(&lists, &refs);
                for (at, track) in refs.iter().zip(&tracks) {
                    if track.state() == TrackState::Downloaded && !downloaded.contains(at) {
                        downloaded.push(*at);
                    }
                }
                tracks.iter().all(|t| t.state() == TrackState::Downloaded)
            };
            if all_succeeded {
                break;
            }
        }

        downloaded
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSet, RemoteFile, SearchResponse, TrackType};

    fn remote_track(path: &str, size: u64, length: Option<u32>) -> Track {
        let mut track = Track::new("A", "", "R", TrackType::Normal);
        track.candidates = Some(CandidateSet::single(
            SearchResponse {
                username: "peer".into(),
                upload_speed: 1024 * 1024,
                ..Default::default()
            },
            RemoteFile {
                filename: path.into(),
                size,
                length,
                bit_rate: None,
            },
        ));
        track
    }

    #[test]
    fn similar_albums_match_sorted_lengths_within_tolerance() {
        let group = vec![
            remote_track("x\\02.mp3", 1, Some(200)),
            remote_track("x\\01.mp3", 1, Some(100)),
            remote_track("x\\cover.jpg", 1, None),
        ];
        assert!(albums_are_similar(&[102, 198], &group, 3));
        assert!(!albums_are_similar(&[110, 200], &group, 3));
        assert!(!albums_are_similar(&[100], &group, 3));
    }

    #[test]
    fn image_only_groups_have_no_audio_lengths() {
        let group = vec![remote_track("x\\cover.jpg", 1, None)];
        assert_eq!(sorted_audio_lengths(&group), None);
        assert!(!albums_are_similar(&[100], &group, 3));
    }

    #[test]
    fn ranking_keys_follow_policy() {
        let big = remote_track("a\\front.png", 900 * 1024, None);
        let small = remote_track("b\\cover.jpg", 90 * 1024, None);
        let small2 = remote_track("b\\back.jpg", 90 * 1024, None);

        let largest_a = rank_key(AlbumArtOption::Largest, &[&big]);
        let largest_b = rank_key(AlbumArtOption::Largest, &[&small, &small2]);
        assert!(largest_a > largest_b);

        let most_a = rank_key(AlbumArtOption::Most, &[&big]);
        let most_b = rank_key(AlbumArtOption::Most, &[&small, &small2]);
        assert!(most_b > most_a);
    }
}
