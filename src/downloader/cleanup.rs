//! Failed album quarantine and deletion.

use std::path::{Path, PathBuf};

use crate::config::AlbumFailAction;
use crate::types::TrackRef;
use crate::utils::{delete_ancestors_if_empty, move_file};

use super::BatchDownloader;

impl BatchDownloader {
    /// Local files of the given tracks that exist on disk
    pub(crate) async fn downloaded_paths(&self, refs: &[TrackRef]) -> Vec<PathBuf> {
        let lists = self.lists.lock().await;
        refs.iter()
            .filter_map(|at| lists.track(*at))
            .filter_map(|t| t.download_path.clone())
            .filter(|p| p.exists())
            .collect()
    }

    /// Delete or quarantine the files of a failed album
    ///
    /// Partial `.incomplete` files are always deleted. Quarantined files keep
    /// their path relative to the output directory. Directories left empty are
    /// removed up to the output directory. Errors are logged per file.
    pub(crate) async fn on_album_fail(&self, refs: &[TrackRef], action: AlbumFailAction) {
        if action == AlbumFailAction::Ignore {
            return;
        }

        let output_dir = self.config.download.output_dir.clone();
        let failed_dir = self.config.failed_album_path();
        let paths = self.downloaded_paths(refs).await;

        for path in paths {
            let partial = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("incomplete"));

            if action == AlbumFailAction::Delete || partial {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => tracing::debug!(path = ?path, "Deleted file of failed album"),
                    Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to delete file"),
                }
            } else {
                let destination = quarantine_path(&path, &output_dir, &failed_dir);
                match move_file(&path, &destination).await {
                    Ok(moved) => tracing::debug!(from = ?path, to = ?moved, "Moved file of failed album"),
                    Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to move file"),
                }
            }

            if let Some(parent) = path.parent() {
                delete_ancestors_if_empty(parent, &output_dir).await;
            }
        }
    }
}

fn quarantine_path(path: &Path, output_dir: &Path, failed_dir: &Path) -> PathBuf {
    match path.strip_prefix(output_dir) {
        Ok(relative) => failed_dir.join(relative),
        Err(_) => failed_dir.join(path.file_name().unwrap_or(path.as_os_str())),
    }
}
