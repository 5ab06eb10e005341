//! Filename-based local file index
//!
//! [`DirectoryIndex`] walks a directory once, on first use, and answers
//! [`FileIndex::track_exists`] by matching normalized file and folder names.
//! Tags are not read.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;

use crate::error::Result;
use crate::services::FileIndex;
use crate::types::{Track, TrackType};
use crate::utils::{is_audio_file, normalize_name};

#[derive(Debug, Clone)]
struct IndexedFile {
    path: PathBuf,
    /// Normalized file stem
    stem: String,
    /// Normalized path of the containing directory, relative to the root
    dir: String,
}

/// Local index over the audio files below one directory
#[derive(Debug)]
pub struct DirectoryIndex {
    root: PathBuf,
    files: RwLock<Option<Vec<IndexedFile>>>,
}

impl DirectoryIndex {
    /// Create an unbuilt index over `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::new(None),
        }
    }

    /// Indexed directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of indexed audio files (0 before the first build)
    pub fn len(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, Vec::len)
    }

    /// Whether the index holds no files
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect<'a>(
        &'a self,
        dir: &'a Path,
        out: &'a mut Vec<IndexedFile>,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    if let Err(e) = self.collect(&path, out).await {
                        tracing::warn!(error = %e, dir = ?path, "Skipping unreadable directory");
                    }
                } else if file_type.is_file() && is_audio_file(&path.to_string_lossy()) {
                    let stem = path
                        .file_stem()
                        .map(|s| normalize_name(&s.to_string_lossy()))
                        .unwrap_or_default();
                    let relative_dir = path
                        .parent()
                        .and_then(|p| p.strip_prefix(&self.root).ok())
                        .map(|p| normalize_name(&p.to_string_lossy()))
                        .unwrap_or_default();
                    out.push(IndexedFile {
                        path,
                        stem,
                        dir: relative_dir,
                    });
                }
            }

            Ok(())
        })
    }

    fn find_track(files: &[IndexedFile], track: &Track) -> Option<PathBuf> {
        let title = normalize_name(&track.title);
        if title.is_empty() {
            return None;
        }
        let artist = normalize_name(&track.artist);
        let check_artist = !track.artist_maybe_wrong && !artist.is_empty();

        files
            .iter()
            .find(|f| {
                f.stem.contains(&title)
                    && (!check_artist || f.stem.contains(&artist) || f.dir.contains(&artist))
            })
            .map(|f| f.path.clone())
    }

    fn find_album(files: &[IndexedFile], track: &Track) -> Option<PathBuf> {
        let album = normalize_name(&track.album);
        if album.is_empty() {
            return None;
        }
        let artist = normalize_name(&track.artist);
        let check_artist = !track.artist_maybe_wrong && !artist.is_empty();

        files
            .iter()
            .find(|f| f.dir.contains(&album) && (!check_artist || f.dir.contains(&artist)))
            .and_then(|f| f.path.parent().map(Path::to_path_buf))
    }
}

#[async_trait]
impl FileIndex for DirectoryIndex {
    fn is_built(&self) -> bool {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    async fn build(&self) -> Result<()> {
        let mut files = Vec::new();
        match self.collect(&self.root, &mut files).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(root = ?self.root, "Index directory does not exist yet");
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(root = ?self.root, files = files.len(), "File index built");
        *self.files.write().unwrap_or_else(|e| e.into_inner()) = Some(files);
        Ok(())
    }

    fn track_exists(&self, track: &Track) -> Option<PathBuf> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let files = files.as_ref()?;

        match track.kind {
            TrackType::Normal if !track.is_not_audio => Self::find_track(files, track),
            TrackType::Album => Self::find_album(files, track),
            _ => None,
        }
    }
}
