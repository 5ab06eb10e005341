//! In-memory network used by the integration tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batchdl::services::{DownloadedFile, Searcher, SessionClient, SessionState, TransferContext};
use batchdl::types::{Candidate, RemoteFile, SearchResponse};
use batchdl::{Config, Result, SearchError, Track};

/// A network that offers a fixed set of titles from one peer
#[derive(Default)]
pub struct FakeNetwork {
    logged_in: AtomicBool,
    available: HashSet<String>,
    /// Number of transfer attempts per title
    pub attempts: Mutex<HashMap<String, usize>>,
}

impl FakeNetwork {
    pub fn offering<'a>(titles: impl IntoIterator<Item = &'a str>) -> Arc<Self> {
        Arc::new(Self {
            available: titles.into_iter().map(str::to_string).collect(),
            ..Default::default()
        })
    }

    pub fn attempts_for(&self, title: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(title)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SessionClient for FakeNetwork {
    fn state(&self) -> SessionState {
        if self.logged_in.load(Ordering::SeqCst) {
            SessionState::LoggedIn
        } else {
            SessionState::Disconnected
        }
    }

    async fn connect(&self, _username: &str, _password: &str) -> Result<()> {
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Searcher for FakeNetwork {
    async fn search_and_download(
        &self,
        track: &Track,
        ctx: &TransferContext,
    ) -> std::result::Result<DownloadedFile, SearchError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(track.title.clone())
            .or_default() += 1;

        if !self.available.contains(&track.title) {
            return Err(SearchError::NoSuitableFileFound);
        }

        let name = format!("{} - {}.mp3", track.artist, track.title);
        let path = ctx.output_dir.join(&name);
        tokio::fs::create_dir_all(&ctx.output_dir).await.unwrap();
        tokio::fs::write(&path, b"audio").await.unwrap();
        ctx.progress.touch();

        Ok(DownloadedFile {
            path,
            candidate: Candidate {
                response: SearchResponse {
                    username: "peer".into(),
                    ..Default::default()
                },
                file: RemoteFile {
                    filename: format!("Music\\{}", name),
                    size: 5,
                    length: track.length,
                    bit_rate: None,
                },
            },
        })
    }

    async fn album_candidates(&self, _source: &Track) -> Result<Vec<Vec<Track>>> {
        Ok(Vec::new())
    }

    async fn aggregate_tracks(&self, _source: &Track) -> Result<Vec<Track>> {
        Ok(Vec::new())
    }

    async fn aggregate_albums(&self, _source: &Track) -> Result<Vec<Vec<Vec<Track>>>> {
        Ok(Vec::new())
    }

    async fn complete_folder(
        &self,
        _tracks: &[Track],
        _response: &SearchResponse,
        _remote_dir: &str,
    ) -> Result<Vec<Track>> {
        Ok(Vec::new())
    }
}

/// Configuration writing into `dir` with fast session timings
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.output_dir = dir.to_path_buf();
    config.session.login_poll_interval = Duration::from_millis(10);
    config.session.watchdog_interval = Duration::from_millis(10);
    config
}
