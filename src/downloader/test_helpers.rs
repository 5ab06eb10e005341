//! Shared test helpers for creating BatchDownloader instances in tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::Notify;

use crate::config::{Config, RetryConfig};
use crate::downloader::BatchDownloader;
use crate::error::{Result, SearchError};
use crate::services::{
    DownloadedFile, FileIndex, IndexSink, Interaction, RunIndex, Searcher, Services,
    SessionClient, SessionState, TransferContext,
};
use crate::types::{
    Candidate, CandidateSet, Event, RemoteFile, SearchResponse, Track, TrackListEntry,
    TrackLists, TrackType,
};
use crate::utils::{remote_dir_name, remote_file_name};

/// Session that logs in on every connect
#[derive(Debug, Default)]
pub(crate) struct MockSession {
    pub logged_in: AtomicBool,
    pub connects: AtomicUsize,
}

#[async_trait]
impl SessionClient for MockSession {
    fn state(&self) -> SessionState {
        if self.logged_in.load(Ordering::SeqCst) {
            SessionState::LoggedIn
        } else {
            SessionState::Disconnected
        }
    }

    async fn connect(&self, _username: &str, _password: &str) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted result of one search-and-download call
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    /// Write a file and succeed
    Ok,
    /// Nothing matched
    NoSuitable,
    /// Unclassified fault
    Transient,
    /// Wait until the transfer is cancelled
    Hang,
    /// Drop the session, then fault
    Disconnect(Arc<MockSession>),
}

/// Searcher driven by per-track scripts
///
/// Tracks are identified by title, or by remote file name when untitled.
/// Unscripted calls succeed.
#[derive(Default)]
pub(crate) struct MockSearcher {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    pub calls: AtomicUsize,
    pub calls_by_track: Mutex<HashMap<String, usize>>,
    pub albums: Mutex<Vec<Vec<Track>>>,
    pub aggregate: Mutex<Vec<Track>>,
    pub aggregate_albums: Mutex<Vec<Vec<Vec<Track>>>>,
    pub source_searches: AtomicUsize,
    /// Extra files per remote folder returned by folder completion
    pub folder_files: Mutex<HashMap<String, Vec<Track>>>,
    pub folder_calls: Mutex<HashMap<(String, String), usize>>,
    /// Notified whenever a `Hang` call starts
    pub hanging: Notify,
    /// Track keys in the order their downloads started
    pub call_order: Mutex<Vec<String>>,
    /// Album candidates per source album name, overriding `albums`
    pub albums_by_source: Mutex<HashMap<String, Vec<Vec<Track>>>>,
    /// Delay before an album source search answers, per source album name
    pub source_delays: Mutex<HashMap<String, Duration>>,    /// Source album names in the order their searches answered
    pub source_search_order: Mutex<Vec<String>>,
}

fn script_key(track: &Track) -> String {
    if !track.title.is_empty() {
        return track.title.clone();
    }
    track
        .first_candidate()
        .map(|c| remote_file_name(&c.file.filename).to_string())
        .unwrap_or_default()
}

impl MockSearcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes for a track
    pub fn script(&self, key: &str, outcomes: impl IntoIterator<Item = Outcome>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls_by_track
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn folder_calls_total(&self) -> usize {
        self.folder_calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Searcher for MockSearcher {
    async fn search_and_download(
        &self,
        track: &Track,
        ctx: &TransferContext,
    ) -> std::result::Result<DownloadedFile, SearchError> {
        let key = script_key(track);
        if ctx.cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_order.lock().unwrap().push(key.clone());
        *self
            .calls_by_track
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default() += 1;

        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Ok);

        match outcome {
            Outcome::NoSuitable => Err(SearchError::NoSuitableFileFound),
            Outcome::Transient => Err(SearchError::Transient("connection reset".into())),
            Outcome::Disconnect(session) => {
                session.logged_in.store(false, Ordering::SeqCst);
                Err(SearchError::Transient("connection lost".into()))
            }
            Outcome::Hang => {
                self.hanging.notify_one();
                ctx.cancel.cancelled().await;
                Err(SearchError::Cancelled)
            }
            Outcome::Ok => {
                let candidate = track.first_candidate().unwrap_or_else(|| Candidate {
                    response: SearchResponse {
                        username: "peer".into(),
                        ..Default::default()
                    },
                    file: RemoteFile {
                        filename: format!("Music\\{} - {}.mp3", track.artist, track.title),
                        size: 1000,
                        length: track.length,
                        bit_rate: None,
                    },
                });

                let dir = remote_file_name(remote_dir_name(&candidate.file.filename));
                let path = ctx
                    .output_dir
                    .join(dir)
                    .join(remote_file_name(&candidate.file.filename));
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.unwrap();
                }
                tokio::fs::write(&path, b"data").await.unwrap();
                Ok(DownloadedFile { path, candidate })
            }
        }
    }

    async fn album_candidates(&self, source: &Track) -> Result<Vec<Vec<Track>>> {
        self.source_searches.fetch_add(1, Ordering::SeqCst);
        let delay = self.source_delays.lock().unwrap().get(&source.album).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.source_search_order
            .lock()
            .unwrap()
            .push(source.album.clone());
        if let Some(groups) = self.albums_by_source.lock().unwrap().get(&source.album) {
            return Ok(groups.clone());
        }
        Ok(self.albums.lock().unwrap().clone())
    }

    async fn aggregate_tracks(&self, _source: &Track) -> Result<Vec<Track>> {
        self.source_searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.aggregate.lock().unwrap().clone())
    }

    async fn aggregate_albums(&self, _source: &Track) -> Result<Vec<Vec<Vec<Track>>>> {
        self.source_searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.aggregate_albums.lock().unwrap().clone())
    }

    async fn complete_folder(
        &self,
        tracks: &[Track],
        response: &SearchResponse,
        remote_dir: &str,
    ) -> Result<Vec<Track>> {
        *self
            .folder_calls
            .lock()
            .unwrap()
            .entry((response.username.clone(), remote_dir.to_string()))
            .or_default() += 1;

        let known: Vec<String> = tracks
            .iter()
            .filter_map(Track::first_candidate)
            .map(|c| c.file.filename)
            .collect();
        Ok(self
            .folder_files
            .lock()
            .unwrap()
            .get(remote_dir)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|t| {
                t.first_candidate()
                    .is_some_and(|c| !known.contains(&c.file.filename))
            })
            .collect())
    }
}

/// Interaction answering from a script
#[derive(Default)]
pub(crate) struct MockInteraction {
    answers: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<String>>,
}

impl MockInteraction {
    pub fn with_answers<'a>(answers: impl IntoIterator<Item = &'a str>) -> Arc<Self> {
        let interaction = Self::default();
        interaction
            .answers
            .lock()
            .unwrap()
            .extend(answers.into_iter().map(str::to_string));
        Arc::new(interaction)
    }
}

#[async_trait]
impl Interaction for MockInteraction {
    async fn read_line(&self, prompt: &str) -> Option<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answers.lock().unwrap().pop_front()
    }

    fn message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// Local index over a fixed title → path map
#[derive(Default)]
pub(crate) struct MockFileIndex {
    pub files: HashMap<String, PathBuf>,
}

impl MockFileIndex {
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Arc<Self> {
        Arc::new(Self {
            files: files
                .into_iter()
                .map(|(title, path)| (title.to_string(), PathBuf::from(path)))
                .collect(),
        })
    }
}

#[async_trait]
impl FileIndex for MockFileIndex {
    fn is_built(&self) -> bool {
        true
    }

    async fn build(&self) -> Result<()> {
        Ok(())
    }

    fn track_exists(&self, track: &Track) -> Option<PathBuf> {
        self.files.get(&track.title).cloned()
    }
}

/// Run index with fixed previous results that counts updates
#[derive(Default)]
pub(crate) struct MockRunIndex {
    pub previous: HashMap<String, Track>,
    pub updates: AtomicUsize,
}

#[async_trait]
impl IndexSink for MockRunIndex {
    async fn update(&self, _lists: &TrackLists) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RunIndex for MockRunIndex {
    fn previous_result(&self, track: &Track) -> Option<Track> {
        self.previous.get(&track.key()).cloned()
    }
}

/// Configuration writing into `dir` with fast timings and no local gates
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.output_dir = dir.join("out");
    config.index.write_index = false;
    config.skip.skip_existing = false;
    config.skip.skip_not_found = false;
    config.search.searches_per_window = 1000;
    config.search.window = Duration::from_secs(1);
    config.session.login_poll_interval = Duration::from_millis(10);
    config.session.watchdog_interval = Duration::from_millis(10);
    config.session.login_retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    std::fs::create_dir_all(&config.download.output_dir).unwrap();
    config
}

/// Services around a searcher, with a fresh session and the given interaction
pub(crate) fn test_services(
    searcher: Arc<MockSearcher>,
    interaction: Arc<MockInteraction>,
) -> Services {
    Services::new(Arc::new(MockSession::default()), searcher).with_interaction(interaction)
}

/// Helper to create a test BatchDownloader with the default test configuration.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    lists: TrackLists,
    searcher: Arc<MockSearcher>,
) -> (BatchDownloader, TempDir) {
    create_test_downloader_with(lists, searcher, MockInteraction::with_answers([]), |_| {}).await
}

/// Like [`create_test_downloader`] with an interaction script and config tweaks
pub(crate) async fn create_test_downloader_with(
    lists: TrackLists,
    searcher: Arc<MockSearcher>,
    interaction: Arc<MockInteraction>,
    configure: impl FnOnce(&mut Config),
) -> (BatchDownloader, TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let downloader = BatchDownloader::new(config, lists, test_services(searcher, interaction))
        .await
        .unwrap();
    (downloader, temp_dir)
}

/// A remote file offered by `user`
pub(crate) fn remote_track(
    user: &str,
    path: &str,
    title: &str,
    length: Option<u32>,
    size: u64,
) -> Track {
    let mut track = Track::new("Artist", title, "Record", TrackType::Normal);
    track.length = length;
    track.is_not_audio = crate::utils::is_image_file(path);
    track.candidates = Some(CandidateSet::single(
        SearchResponse {
            username: user.into(),
            upload_speed: 1024 * 1024,
            has_free_upload_slot: true,
            queue_length: 0,
        },
        RemoteFile {
            filename: path.into(),
            size,
            length,
            bit_rate: Some(320),
        },
    ));
    track
}

/// One candidate folder of audio tracks `"<dir>\<title>.mp3"`
pub(crate) fn album_group(user: &str, dir: &str, titles: &[&str]) -> Vec<Track> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            remote_track(
                user,
                &format!("{}\\{}.mp3", dir, title),
                title,
                Some(180 + i as u32 * 10),
                5_000_000,
            )
        })
        .collect()
}

/// An album item whose candidate groups are already known
pub(crate) fn album_entry(groups: Vec<Vec<Track>>) -> TrackListEntry {
    let source = Track::new("Artist", "", "Record", TrackType::Album);
    let mut entry = TrackListEntry::with_list(groups, source);
    entry.need_source_search = false;
    entry
}

/// Plain tracks sharing one item
pub(crate) fn plain_lists(titles: &[&str]) -> TrackLists {
    TrackLists::from_flattened(
        titles
            .iter()
            .map(|t| Track::new("Artist", *t, "", TrackType::Normal)),
    )
}

/// Every event received so far
pub(crate) fn drain_events(events: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
