//! Core types for batchdl
//!
//! The entity model is deliberately passive: [`Track`], [`TrackListEntry`] and
//! [`TrackLists`] hold what is wanted and what has been found, and only expose
//! mutation helpers that preserve their invariants. All behavior lives in the
//! [`downloader`](crate::downloader) module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::services::{IndexSink, RunIndex};

/// Kind of a wanted item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    /// A single track
    #[default]
    Normal,
    /// A whole album that must be downloaded all-or-nothing
    Album,
    /// Many matching tracks flattened into one virtual playlist
    Aggregate,
    /// Many matching albums, each expanded into its own album item
    AlbumAggregate,
}

impl TrackType {
    /// Convert TrackType to its integer code (used in track keys)
    pub fn to_i32(&self) -> i32 {
        match self {
            TrackType::Normal => 0,
            TrackType::Album => 1,
            TrackType::Aggregate => 2,
            TrackType::AlbumAggregate => 3,
        }
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrackType::Normal => "Normal",
            TrackType::Album => "Album",
            TrackType::Aggregate => "Aggregate",
            TrackType::AlbumAggregate => "AlbumAggregate",
        };
        f.write_str(name)
    }
}

/// Download state of a track
///
/// `Initial` is the only non-terminal state. Every other state is final for the
/// duration of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Not yet attempted
    #[default]
    Initial,
    /// Downloaded during this run
    Downloaded,
    /// Attempted and failed (see [`FailureReason`])
    Failed,
    /// Found in the local file index
    AlreadyExists,
    /// Recorded as not found by a prior run
    NotFoundLastTime,
}

impl TrackState {
    /// Convert an integer state code to a TrackState
    ///
    /// Returns `None` for unknown codes.
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(TrackState::Initial),
            1 => Some(TrackState::Downloaded),
            2 => Some(TrackState::Failed),
            3 => Some(TrackState::AlreadyExists),
            4 => Some(TrackState::NotFoundLastTime),
            _ => None,
        }
    }

    /// Convert TrackState to its integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            TrackState::Initial => 0,
            TrackState::Downloaded => 1,
            TrackState::Failed => 2,
            TrackState::AlreadyExists => 3,
            TrackState::NotFoundLastTime => 4,
        }
    }

    /// Whether this state ends the track's lifecycle for the run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackState::Initial)
    }

    /// Whether the track is locally available (downloaded now or earlier)
    pub fn is_satisfied(&self) -> bool {
        matches!(self, TrackState::Downloaded | TrackState::AlreadyExists)
    }
}

/// Why a track ended in [`TrackState::Failed`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No failure recorded
    #[default]
    None,
    /// The search string was rejected
    InvalidSearchString,
    /// Every retry was consumed
    OutOfDownloadRetries,
    /// Nothing on the network matched the acceptance criteria
    NoSuitableFileFound,
    /// Every candidate download failed
    AllDownloadsFailed,
    /// Cancellation or an unclassified fault
    Other,
}

impl FailureReason {
    /// Convert an integer code to a FailureReason
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => FailureReason::InvalidSearchString,
            2 => FailureReason::OutOfDownloadRetries,
            3 => FailureReason::NoSuitableFileFound,
            4 => FailureReason::AllDownloadsFailed,
            5 => FailureReason::Other,
            _ => FailureReason::None,
        }
    }

    /// Convert FailureReason to its integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            FailureReason::None => 0,
            FailureReason::InvalidSearchString => 1,
            FailureReason::OutOfDownloadRetries => 2,
            FailureReason::NoSuitableFileFound => 3,
            FailureReason::AllDownloadsFailed => 4,
            FailureReason::Other => 5,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureReason::None => "None",
            FailureReason::InvalidSearchString => "InvalidSearchString",
            FailureReason::OutOfDownloadRetries => "OutOfDownloadRetries",
            FailureReason::NoSuitableFileFound => "NoSuitableFileFound",
            FailureReason::AllDownloadsFailed => "AllDownloadsFailed",
            FailureReason::Other => "Other",
        };
        f.write_str(name)
    }
}

/// A peer's answer to a search
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Peer username
    pub username: String,
    /// Advertised upload speed in bytes per second
    pub upload_speed: u64,
    /// Whether the peer currently has a free upload slot
    pub has_free_upload_slot: bool,
    /// Length of the peer's upload queue
    pub queue_length: u64,
}

/// A file shared by a peer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Full remote path (backslash separated)
    pub filename: String,
    /// Size in bytes
    pub size: u64,
    /// Duration in seconds, when the peer reports it
    pub length: Option<u32>,
    /// Bit rate in kbps, when the peer reports it
    pub bit_rate: Option<u32>,
}

impl RemoteFile {
    /// The file name component of the remote path
    pub fn name(&self) -> &str {
        crate::utils::remote_file_name(&self.filename)
    }
}

/// One remote file proposed for a track, with the response it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// The response that advertised the file
    pub response: SearchResponse,
    /// The advertised file
    pub file: RemoteFile,
}

impl Candidate {
    /// Unique remote identity: `username\path`
    pub fn key(&self) -> String {
        format!("{}\\{}", self.response.username, self.file.filename)
    }
}

#[derive(Debug, Default)]
struct CandidateSetInner {
    entries: Vec<Candidate>,
    frozen: bool,
}

/// Append-only, thread-safe collection of candidates for one track
///
/// Search responses may be inserted from several tasks at once. Entries are
/// keyed by remote identity and duplicates are ignored. Once the owning track
/// leaves [`TrackState::Initial`] the set is frozen and further inserts are
/// dropped. Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct CandidateSet {
    inner: Arc<RwLock<CandidateSetInner>>,
}

impl CandidateSet {
    /// Create an empty candidate set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a candidate set holding a single candidate
    pub fn single(response: SearchResponse, file: RemoteFile) -> Self {
        let set = Self::new();
        set.insert(response, file);
        set
    }

    /// Insert a candidate, returning whether it was added
    pub fn insert(&self, response: SearchResponse, file: RemoteFile) -> bool {
        let candidate = Candidate { response, file };
        let key = candidate.key();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.frozen || inner.entries.iter().any(|c| c.key() == key) {
            return false;
        }
        inner.entries.push(candidate);
        true
    }

    /// The first candidate inserted
    pub fn first(&self) -> Option<Candidate> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.first().cloned()
    }

    /// A copy of all candidates in insertion order
    pub fn snapshot(&self) -> Vec<Candidate> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.clone()
    }

    /// Number of candidates
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Whether the set holds no candidates
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting inserts
    pub fn freeze(&self) {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).frozen = true;
    }

    /// Whether inserts are still accepted
    pub fn is_frozen(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).frozen
    }
}

/// One wanted or resolved audio/image item
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Track {
    /// Track title
    #[serde(default)]
    pub title: String,
    /// Artist name
    #[serde(default)]
    pub artist: String,
    /// Album name
    #[serde(default)]
    pub album: String,
    /// External reference (playlist entry URL, catalog id, ...)
    #[serde(default)]
    pub uri: String,
    /// Nominal length in seconds
    #[serde(default)]
    pub length: Option<u32>,
    /// The artist field may be unreliable and should not be required in matches
    #[serde(default)]
    pub artist_maybe_wrong: bool,
    /// Minimum acceptable album track count
    #[serde(default)]
    pub min_album_track_count: Option<u32>,
    /// Maximum acceptable album track count
    #[serde(default)]
    pub max_album_track_count: Option<u32>,
    /// Non-audio asset (cover art, booklet)
    #[serde(default)]
    pub is_not_audio: bool,
    /// Local path once downloaded or found
    #[serde(default)]
    pub download_path: Option<PathBuf>,
    /// Ordinal of the item in its input
    #[serde(default)]
    pub item_number: Option<usize>,
    /// Item kind
    #[serde(default, rename = "type")]
    pub kind: TrackType,
    #[serde(default)]
    state: TrackState,
    #[serde(default)]
    failure_reason: FailureReason,
    /// Remote candidates discovered for this track
    #[serde(skip)]
    pub candidates: Option<CandidateSet>,
}

impl Track {
    /// Create a track of the given kind
    pub fn new(
        artist: impl Into<String>,
        title: impl Into<String>,
        album: impl Into<String>,
        kind: TrackType,
    ) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            album: album.into(),
            kind,
            ..Self::default()
        }
    }

    /// Current state
    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Failure reason (only meaningful when [`TrackState::Failed`])
    pub fn failure_reason(&self) -> FailureReason {
        self.failure_reason
    }

    /// Move the track out of `Initial`
    ///
    /// Returns `false` without changing anything if the track is already in a
    /// terminal state or `state` is `Initial`. The candidate set is frozen on a
    /// successful transition.
    pub fn set_state(&mut self, state: TrackState) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        if let Some(candidates) = &self.candidates {
            candidates.freeze();
        }
        true
    }

    /// Mark the track failed with a reason
    pub fn fail(&mut self, reason: FailureReason) -> bool {
        if !self.set_state(TrackState::Failed) {
            return false;
        }
        self.failure_reason = reason;
        true
    }

    /// Force a state and path regardless of the current state
    ///
    /// Only the post-completion hook's output protocol uses this.
    pub fn override_state(&mut self, state: TrackState, path: Option<PathBuf>) {
        self.state = state;
        if state != TrackState::Failed {
            self.failure_reason = FailureReason::None;
        }
        if path.is_some() {
            self.download_path = path;
        }
    }

    /// Restore a previously recorded state (run index loading)
    pub(crate) fn with_recorded(mut self, state: TrackState, reason: FailureReason) -> Self {
        self.state = state;
        self.failure_reason = reason;
        self
    }

    /// Identity of the track in the run index: `artist;album;title;length;type`
    pub fn key(&self) -> String {
        format!(
            "{};{};{};{};{}",
            self.artist,
            self.album,
            self.title,
            self.length.map_or(-1, i64::from),
            self.kind.to_i32()
        )
    }

    /// First remote candidate, if any
    pub fn first_candidate(&self) -> Option<Candidate> {
        self.candidates.as_ref().and_then(CandidateSet::first)
    }

    /// Whether the track outputs a directory rather than a single file
    pub fn outputs_directory(&self) -> bool {
        self.kind != TrackType::Normal
    }

    /// Human readable name
    ///
    /// With `no_info` the length and kind suffixes are omitted.
    pub fn display_name(&self, no_info: bool) -> String {
        let first = self.first_candidate();

        if self.is_not_audio
            && let Some(candidate) = &first
        {
            return candidate.file.name().to_string();
        }

        let mut name = self.artist.clone();
        if self.kind == TrackType::Normal
            && self.title.is_empty()
            && let Some(candidate) = &first
        {
            name = candidate.file.name().to_string();
        } else if !self.title.is_empty() || !self.album.is_empty() {
            if !name.is_empty() {
                name.push_str(" - ");
            }
            if self.kind == TrackType::Album {
                name.push_str(&self.album);
            } else if !self.title.is_empty() {
                name.push_str(&self.title);
            }
            if !no_info {
                if let Some(length) = self.length.filter(|l| *l > 0) {
                    name.push_str(&format!(" ({length}s)"));
                }
                if self.kind == TrackType::Album {
                    name.push_str(" (album)");
                }
            }
        } else if !no_info {
            name.push_str(" (artist)");
        }

        name
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_name(false))
    }
}

/// Address of a track inside [`TrackLists`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackRef {
    /// Entry index
    pub entry: usize,
    /// Candidate group index within the entry
    pub group: usize,
    /// Track index within the group
    pub index: usize,
}

/// One wanted item plus its resolution
#[derive(Clone, Default)]
pub struct TrackListEntry {
    /// Candidate groups; for plain items a single group holding the wanted tracks
    pub list: Vec<Vec<Track>>,
    /// The item as requested
    pub source: Track,
    /// A source-level search is still required
    pub need_source_search: bool,
    /// The source may be skipped by the local-state gates
    pub source_can_be_skipped: bool,
    /// Run skip-existing over the children after the source search
    pub need_skip_existing_after_search: bool,
    /// After the source search, continue with the next item instead of downloading
    pub goto_next_after_search: bool,
    /// A not-found source also marks its children not found
    pub not_found_marks_children: bool,
    /// Apply track preprocessing before the item is handled
    pub preprocess: bool,
    /// Item-level interactive mode override (`None` follows the config)
    pub interactive: Option<bool>,
    /// Name of the input item (playlist name, album name, ...)
    pub item_name: Option<String>,
    /// Run index used for skip-not-found and progress records
    pub index: Option<Arc<dyn RunIndex>>,
    /// Playlist sink notified alongside the index
    pub playlist: Option<Arc<dyn IndexSink>>,
}

impl std::fmt::Debug for TrackListEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackListEntry")
            .field("source", &self.source)
            .field("list", &self.list)
            .field("need_source_search", &self.need_source_search)
            .field("source_can_be_skipped", &self.source_can_be_skipped)
            .field("interactive", &self.interactive)
            .field("item_name", &self.item_name)
            .field("has_index", &self.index.is_some())
            .field("has_playlist", &self.playlist.is_some())
            .finish_non_exhaustive()
    }
}

impl TrackListEntry {
    /// Create an entry for a source, deriving the flags from its kind
    ///
    /// A plain track becomes its own single candidate group.
    pub fn new(source: Track) -> Self {
        let list = if source.kind == TrackType::Normal {
            vec![vec![source.clone()]]
        } else {
            Vec::new()
        };
        Self::with_list(list, source)
    }

    /// Create an entry with pre-populated candidate groups
    pub fn with_list(list: Vec<Vec<Track>>, source: Track) -> Self {
        let kind = source.kind;
        let source_can_be_skipped = !matches!(
            kind,
            TrackType::Normal | TrackType::Aggregate | TrackType::AlbumAggregate
        );
        Self {
            list,
            source,
            need_source_search: kind != TrackType::Normal,
            source_can_be_skipped,
            need_skip_existing_after_search: kind == TrackType::Aggregate,
            goto_next_after_search: kind == TrackType::AlbumAggregate,
            not_found_marks_children: source_can_be_skipped,
            preprocess: true,
            interactive: None,
            item_name: None,
            index: None,
            playlist: None,
        }
    }

    /// Whether the source search may run concurrently with other items' searches
    pub fn can_parallel_search(&self) -> bool {
        self.need_source_search
            && matches!(self.source.kind, TrackType::Album | TrackType::Aggregate)
    }

    /// Item name, falling back to the source's display name
    pub fn item_name_or_source(&self) -> String {
        self.item_name
            .clone()
            .unwrap_or_else(|| self.source.display_name(true))
    }

    /// Total number of tracks over all candidate groups
    pub fn track_count(&self) -> usize {
        self.list.iter().map(Vec::len).sum()
    }
}

/// Ordered collection of wanted items
#[derive(Clone, Debug, Default)]
pub struct TrackLists {
    /// Entries in processing order
    pub entries: Vec<TrackListEntry>,
}

impl TrackLists {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Build entries from a flat sequence of tracks
    ///
    /// Consecutive plain tracks share one entry; every other kind gets its own.
    pub fn from_flattened(tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut lists = Self::new();
        let mut in_plain_run = false;

        for track in tracks {
            if track.kind != TrackType::Normal {
                lists.add_entry(TrackListEntry::new(track));
                in_plain_run = false;
            } else if in_plain_run {
                lists.add_track_to_last(track);
            } else {
                lists.add_entry(TrackListEntry::with_list(Vec::new(), Track::default()));
                lists.add_track_to_last(track);
                in_plain_run = true;
            }
        }

        lists
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry
    pub fn add_entry(&mut self, entry: TrackListEntry) {
        self.entries.push(entry);
    }

    /// Append a track to the last group of the last entry
    ///
    /// Creates a plain entry when the collection is empty and a first group
    /// when the last entry has none.
    pub fn add_track_to_last(&mut self, track: Track) {
        let Some(last) = self.entries.last_mut() else {
            self.add_entry(TrackListEntry::with_list(
                vec![vec![track]],
                Track::default(),
            ));
            return;
        };

        match last.list.last_mut() {
            Some(group) => group.push(track),
            None => last.list.push(vec![track]),
        }
    }

    /// Reverse the entries and every candidate group
    pub fn reverse(&mut self) {
        self.entries.reverse();
        for entry in &mut self.entries {
            for group in &mut entry.list {
                group.reverse();
            }
        }
    }

    /// Promote item kinds
    ///
    /// Albums become album-aggregates when `aggregate` is set; aggregates become
    /// album-aggregates when `album` is set; each plain track becomes its own
    /// entry of the promoted kind. Source identity and item-level settings are
    /// preserved.
    pub fn upgrade_list_types(&mut self, aggregate: bool, album: bool) {
        if !aggregate && !album {
            return;
        }

        let promoted = match (album, aggregate) {
            (true, true) => TrackType::AlbumAggregate,
            (true, false) => TrackType::Album,
            _ => TrackType::Aggregate,
        };

        let mut upgraded = Vec::with_capacity(self.entries.len());
        for mut entry in std::mem::take(&mut self.entries) {
            match entry.source.kind {
                TrackType::Album if aggregate => {
                    entry.source.kind = TrackType::AlbumAggregate;
                    entry.goto_next_after_search = true;
                    entry.source_can_be_skipped = false;
                    entry.not_found_marks_children = false;
                    upgraded.push(entry);
                }
                TrackType::Aggregate if album => {
                    entry.source.kind = TrackType::AlbumAggregate;
                    entry.goto_next_after_search = true;
                    entry.need_skip_existing_after_search = false;
                    upgraded.push(entry);
                }
                TrackType::Normal => {
                    let tracks = entry.list.into_iter().next().unwrap_or_default();
                    for mut track in tracks {
                        track.kind = promoted;
                        let mut promoted_entry = TrackListEntry::new(track);
                        promoted_entry.interactive = entry.interactive;
                        promoted_entry.item_name = entry.item_name.clone();
                        promoted_entry.index = entry.index.clone();
                        promoted_entry.playlist = entry.playlist.clone();
                        upgraded.push(promoted_entry);
                    }
                }
                _ => upgraded.push(entry),
            }
        }

        self.entries = upgraded;
    }

    /// Iterate tracks entry by entry
    ///
    /// With `add_sources`, the source of every non-plain entry is yielded before
    /// its children (a plain entry's source is the track itself, already present
    /// in its group). The first group's tracks are yielded for plain entries, and
    /// for other kinds only with `add_special_source_tracks`. With
    /// `sources_only`, exactly one source per entry is yielded.
    pub fn flattened(
        &self,
        add_sources: bool,
        add_special_source_tracks: bool,
        sources_only: bool,
    ) -> impl Iterator<Item = &Track> + '_ {
        self.entries.iter().flat_map(move |entry| {
            let is_plain = entry.source.kind == TrackType::Normal;
            let source = (sources_only || (add_sources && !is_plain)).then_some(&entry.source);
            let children = (!sources_only && (is_plain || add_special_source_tracks))
                .then(|| entry.list.first())
                .flatten()
                .into_iter()
                .flatten();
            source.into_iter().chain(children)
        })
    }

    /// Track at an address
    pub fn track(&self, at: TrackRef) -> Option<&Track> {
        self.entries.get(at.entry)?.list.get(at.group)?.get(at.index)
    }

    /// Mutable track at an address
    pub fn track_mut(&mut self, at: TrackRef) -> Option<&mut Track> {
        self.entries
            .get_mut(at.entry)?
            .list
            .get_mut(at.group)?
            .get_mut(at.index)
    }

    /// Addresses of every track in one candidate group
    pub fn group_refs(&self, entry: usize, group: usize) -> Vec<TrackRef> {
        let len = self
            .entries
            .get(entry)
            .and_then(|e| e.list.get(group))
            .map_or(0, Vec::len);
        (0..len)
            .map(|index| TrackRef {
                entry,
                group,
                index,
            })
            .collect()
    }
}

/// Outcome counts of a finished run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tracks downloaded during this run
    pub downloaded: usize,
    /// Tracks found locally
    pub already_exist: usize,
    /// Tracks skipped because a prior run did not find them
    pub not_found_last_time: usize,
    /// Tracks that failed
    pub failed: usize,
    /// Display names of the failed tracks with their reasons
    pub failed_tracks: Vec<String>,
}

impl RunSummary {
    /// Count the outcome of every wanted track
    pub fn from_lists(lists: &TrackLists) -> Self {
        let mut summary = Self::default();
        for track in lists.flattened(true, false, false) {
            match track.state() {
                TrackState::Downloaded => summary.downloaded += 1,
                TrackState::AlreadyExists => summary.already_exist += 1,
                TrackState::NotFoundLastTime => summary.not_found_last_time += 1,
                TrackState::Failed => {
                    summary.failed += 1;
                    summary
                        .failed_tracks
                        .push(format!("{} [{}]", track.display_name(false), track.failure_reason()));
                }
                TrackState::Initial => {}
            }
        }
        summary
    }
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Processing of an item began
    ItemStarted {
        /// Entry index
        index: usize,
        /// Item display name
        name: String,
        /// Item kind
        kind: TrackType,
    },

    /// An item was skipped without touching the network
    ItemSkipped {
        /// Entry index
        index: usize,
        /// Item display name
        name: String,
        /// The state that caused the skip
        state: TrackState,
    },

    /// A source-level search finished
    SearchFinished {
        /// Entry index
        index: usize,
        /// Item display name
        name: String,
        /// Number of candidate groups found
        groups: usize,
    },

    /// Tracks that would be downloaded (dry run)
    TracksPlanned {
        /// Entry index
        index: usize,
        /// Display names of the tracks still to download
        tracks: Vec<String>,
        /// Number of tracks found locally
        existing: usize,
        /// Number of tracks not found by a prior run
        not_found: usize,
    },

    /// A track was downloaded
    TrackDownloaded {
        /// Track display name
        name: String,
        /// Local path
        path: PathBuf,
    },

    /// A track failed
    TrackFailed {
        /// Track display name
        name: String,
        /// Failure reason
        reason: FailureReason,
    },

    /// An album finished successfully
    AlbumDownloaded {
        /// Album display name
        name: String,
        /// Common directory of the downloaded audio
        path: Option<PathBuf>,
    },

    /// An album download attempt was cancelled
    AlbumCancelled {
        /// Album display name
        name: String,
        /// The user pressed the cancel key
        user_initiated: bool,
    },

    /// An album failed after exhausting its candidates
    AlbumFailed {
        /// Album display name
        name: String,
    },

    /// A transfer made no progress for too long and was cancelled
    TransferStalled {
        /// Transfer key
        key: String,
    },

    /// The session dropped and a re-login is being attempted
    Disconnected,

    /// The whole run finished
    RunComplete {
        /// Outcome counts
        summary: RunSummary,
    },
}
