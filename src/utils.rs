//! Utility functions for file operations and path manipulation
//!
//! Remote paths use `\` as separator regardless of platform; local paths go
//! through [`std::path`].

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "alac", "wav", "wma", "ape", "wv", "aiff", "aif",
];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

/// File name component of a remote path
///
/// ```
/// use batchdl::utils::remote_file_name;
///
/// assert_eq!(remote_file_name("Music\\Album\\01 Song.flac"), "01 Song.flac");
/// assert_eq!(remote_file_name("song.mp3"), "song.mp3");
/// ```
pub fn remote_file_name(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

/// Directory component of a remote path (empty for a bare file name)
pub fn remote_dir_name(path: &str) -> &str {
    path.rfind('\\').map_or("", |i| &path[..i])
}

/// Deepest remote directory containing every path
///
/// Paths are file paths; their directories are compared component by component.
pub fn greatest_common_remote_dir<'a>(paths: impl IntoIterator<Item = &'a str>) -> String {
    let mut common: Option<Vec<&str>> = None;

    for path in paths {
        let dir: Vec<&str> = remote_dir_name(path).split('\\').collect();
        common = Some(match common {
            None => dir,
            Some(prefix) => prefix
                .into_iter()
                .zip(dir)
                .take_while(|(a, b)| a.eq_ignore_ascii_case(b))
                .map(|(a, _)| a)
                .collect(),
        });
    }

    common.map(|parts| parts.join("\\")).unwrap_or_default()
}

/// Deepest local directory containing every file
///
/// Returns `None` for an empty input.
pub fn greatest_common_dir<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Option<PathBuf> {
    let mut common: Option<PathBuf> = None;

    for path in paths {
        let dir = path.parent().unwrap_or(path);
        common = Some(match common {
            None => dir.to_path_buf(),
            Some(prefix) => prefix
                .components()
                .zip(dir.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }

    common
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Whether a file name (local or remote) has an image extension
#[must_use]
pub fn is_image_file(name: &str) -> bool {
    has_extension(remote_file_name(name), IMAGE_EXTENSIONS)
}

/// Whether a file name (local or remote) has an audio extension
#[must_use]
pub fn is_audio_file(name: &str) -> bool {
    has_extension(remote_file_name(name), AUDIO_EXTENSIONS)
}

/// A path that does not exist yet, adding ` (n)` before the extension if needed
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let candidate = parent.join(new_name);
        if !candidate.exists() {
            return candidate;
        }
    }

    path.to_path_buf()
}

/// Move a file, creating the destination directory
///
/// Falls back to copy and delete when a rename is not possible (different
/// filesystems). Returns the path the file ended up at.
pub async fn move_file(source: &Path, destination: &Path) -> std::io::Result<PathBuf> {
    use tokio::fs;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }
    let destination = unique_path(destination);

    if let Err(e) = fs::rename(source, &destination).await {
        tracing::debug!(error = %e, ?source, ?destination, "Rename failed, copying instead");
        fs::copy(source, &destination).await?;
        fs::remove_file(source).await?;
    }

    Ok(destination)
}

/// Remove `dir` and its ancestors while they are empty, stopping at `root`
///
/// `root` itself is never removed, nor is anything outside it.
pub async fn delete_ancestors_if_empty(dir: &Path, root: &Path) {
    let mut current = Some(dir);

    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // remove_dir fails on non-empty directories, which ends the walk
        if tokio::fs::remove_dir(dir).await.is_err() {
            break;
        }
        tracing::debug!(?dir, "Removed empty directory");
        current = dir.parent();
    }
}

fn bracketed_ft_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*[(\[](?:feat\.?|ft\.?|featuring)\s[^)\]]*[)\]]")
            .unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

fn trailing_ft_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s+(?:feat\.|ft\.|featuring\s|feat\s|ft\s).*$")
            .unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

fn square_brackets_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s*\[[^\]]*\]").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Strip featured-artist credits ("feat. X", "(ft. X)", ...)
pub fn remove_ft(s: &str) -> String {
    let without_groups = bracketed_ft_regex().replace_all(s, "");
    trailing_ft_regex()
        .replace(&without_groups, "")
        .trim()
        .to_string()
}

/// Strip every `[...]` group
pub fn remove_square_brackets(s: &str) -> String {
    square_brackets_regex().replace_all(s, "").trim().to_string()
}

/// Lowercase and collapse everything but letters and digits to single spaces
pub fn normalize_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
