//! Collaborator traits consumed by the download engine

use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SearchError};
use crate::session::TransferProgress;
use crate::types::{Candidate, SearchResponse, Track, TrackLists};

/// Connection state reported by the session client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No connection
    Disconnected,
    /// TCP connection in progress
    Connecting,
    /// Connected, login in progress
    LoggingIn,
    /// Connected and authenticated
    LoggedIn,
}

impl SessionState {
    /// Connected and authenticated
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionState::LoggedIn)
    }

    /// A connect or login is already underway
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::LoggingIn)
    }
}

/// Network session: connection and authentication
///
/// The engine polls [`state`](SessionClient::state); it never expects push
/// notifications.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Current connection state
    fn state(&self) -> SessionState;

    /// Connect and log in
    ///
    /// Unreachable-server and timeout failures should be reported as
    /// [`Error::session_transient`](crate::Error::session_transient).
    async fn connect(&self, username: &str, password: &str) -> Result<()>;
}

/// Everything a single transfer attempt needs besides the track itself
#[derive(Clone, Debug)]
pub struct TransferContext {
    /// Cancelled when the batch is cancelled or the watchdog declares the transfer stalled
    pub cancel: CancellationToken,
    /// Progress handle; call [`TransferProgress::touch`] whenever the transfer advances
    pub progress: TransferProgress,
    /// Directory downloads are written to
    pub output_dir: PathBuf,
    /// Name of the item the track belongs to
    pub item_name: Option<String>,
    /// Common remote directory of the album being downloaded
    pub remote_dir: Option<String>,
}

/// A completed transfer
#[derive(Clone, Debug)]
pub struct DownloadedFile {
    /// Where the file was written
    pub path: PathBuf,
    /// The remote file that was transferred
    pub candidate: Candidate,
}

/// Searching the network and transferring files
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Find the best remote file for a track and download it
    ///
    /// Fails with [`SearchError::NoSuitableFileFound`] when nothing matches,
    /// [`SearchError::Cancelled`] when `ctx.cancel` fires, and
    /// [`SearchError::Transient`] for everything else.
    async fn search_and_download(
        &self,
        track: &Track,
        ctx: &TransferContext,
    ) -> std::result::Result<DownloadedFile, SearchError>;

    /// Candidate folders for an album, best first
    async fn album_candidates(&self, source: &Track) -> Result<Vec<Vec<Track>>>;

    /// Every distinct track matching an aggregate query
    async fn aggregate_tracks(&self, source: &Track) -> Result<Vec<Track>>;

    /// Every distinct album matching an album-aggregate query, each with its candidate folders
    async fn aggregate_albums(&self, source: &Track) -> Result<Vec<Vec<Vec<Track>>>>;

    /// List the whole remote folder and return the files not already in `tracks`
    async fn complete_folder(
        &self,
        tracks: &[Track],
        response: &SearchResponse,
        remote_dir: &str,
    ) -> Result<Vec<Track>>;
}

/// Moves downloaded files into their final layout
///
/// Called inside the engine's state critical section, so implementations must
/// not block on the engine.
pub trait Organizer: Send + Sync {
    /// Place a single downloaded track, updating its `download_path`
    fn organize_track(
        &self,
        track: &mut Track,
        file: Option<&Candidate>,
        remote_dir: Option<&str>,
    ) -> Result<()>;

    /// Lay out a whole album (audio and images), updating `download_path`s
    fn organize_album(&self, source: &Track, tracks: &mut [Track]) -> Result<()>;
}

/// Removes satisfied items from the input they came from (a remote playlist, ...)
#[async_trait]
pub trait SourceRemover: Send + Sync {
    /// Remove one track or item source
    async fn remove_track_from_source(&self, track: &Track) -> Result<()>;
}

/// Durable sink notified after state changes (index or playlist writer)
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Persist the current state of every track
    async fn update(&self, lists: &TrackLists) -> Result<()>;
}

/// Record of prior runs
#[async_trait]
pub trait RunIndex: IndexSink {
    /// The recorded outcome of a track in a previous run
    fn previous_result(&self, track: &Track) -> Option<Track>;
}

/// Local file index used by skip-existing
#[async_trait]
pub trait FileIndex: Send + Sync {
    /// Whether [`build`](FileIndex::build) has completed
    fn is_built(&self) -> bool;

    /// Scan the indexed directory
    async fn build(&self) -> Result<()>;

    /// Local path of a file that satisfies the track
    fn track_exists(&self, track: &Track) -> Option<PathBuf>;
}

/// Line-based user interaction
#[async_trait]
pub trait Interaction: Send + Sync {
    /// Show a prompt and read one line (without the line terminator)
    ///
    /// Returns `None` when input is closed.
    async fn read_line(&self, prompt: &str) -> Option<String>;

    /// Present one candidate group during interactive selection
    fn show_candidates(&self, position: usize, total: usize, tracks: &[Track]) {
        let _ = (position, total, tracks);
    }

    /// Show an informational line
    fn message(&self, text: &str) {
        let _ = text;
    }
}
