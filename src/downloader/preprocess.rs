//! Track string normalization applied before an item is searched.

use regex::Regex;

use crate::config::{PreprocessConfig, RegexReplacement};
use crate::error::{Error, Result};
use crate::types::{Track, TrackListEntry};
use crate::utils::{remove_ft, remove_square_brackets};

use super::BatchDownloader;

#[derive(Debug, Clone)]
struct Replacement {
    pattern: Regex,
    replacement: String,
}

impl Replacement {
    fn compile(key: &str, r: &Option<RegexReplacement>) -> Result<Option<Self>> {
        let Some(r) = r else {
            return Ok(None);
        };
        let pattern = Regex::new(&r.pattern).map_err(|e| Error::Config {
            message: format!("invalid regex '{}': {}", r.pattern, e),
            key: Some(key.into()),
        })?;
        Ok(Some(Self {
            pattern,
            replacement: r.replacement.clone(),
        }))
    }

    fn apply(&self, s: &str) -> String {
        self.pattern
            .replace_all(s, self.replacement.as_str())
            .into_owned()
    }
}

/// Compiled preprocessing rules
///
/// Steps run in a fixed order: featured-artist removal, bracket removal, regex
/// replacement, then trimming.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    remove_ft: bool,
    remove_brackets: bool,
    artist_maybe_wrong: bool,
    title: Option<Replacement>,
    artist: Option<Replacement>,
    album: Option<Replacement>,
}

impl Preprocessor {
    /// Compile the configured rules
    pub fn new(config: &PreprocessConfig) -> Result<Self> {
        Ok(Self {
            remove_ft: config.remove_ft,
            remove_brackets: config.remove_brackets,
            artist_maybe_wrong: config.artist_maybe_wrong,
            title: Replacement::compile("preprocess.title_regex", &config.title_regex)?,
            artist: Replacement::compile("preprocess.artist_regex", &config.artist_regex)?,
            album: Replacement::compile("preprocess.album_regex", &config.album_regex)?,
        })
    }

    /// Normalize one track in place
    pub fn apply(&self, track: &mut Track) {
        if self.remove_ft {
            track.title = remove_ft(&track.title);
            track.artist = remove_ft(&track.artist);
        }
        if self.remove_brackets {
            track.title = remove_square_brackets(&track.title);
        }
        if let Some(r) = &self.title {
            track.title = r.apply(&track.title);
        }
        if let Some(r) = &self.artist {
            track.artist = r.apply(&track.artist);
        }
        if let Some(r) = &self.album {
            track.album = r.apply(&track.album);
        }
        if self.artist_maybe_wrong {
            track.artist_maybe_wrong = true;
        }

        track.title = track.title.trim().to_string();
        track.artist = track.artist.trim().to_string();
        track.album = track.album.trim().to_string();
    }

    /// Normalize an entry's source and every track in its groups
    pub fn apply_entry(&self, entry: &mut TrackListEntry) {
        self.apply(&mut entry.source);
        for track in entry.list.iter_mut().flatten() {
            self.apply(track);
        }
    }
}

impl BatchDownloader {
    /// Apply preprocessing to an entry if it asks for it
    ///
    /// The flag is cleared afterwards so an entry is only normalized once.
    pub(crate) async fn preprocess_entry(&self, entry: usize) {
        let mut lists = self.lists.lock().await;
        if let Some(e) = lists.entries.get_mut(entry)
            && e.preprocess
        {
            self.preprocessor.apply_entry(e);
            e.preprocess = false;
        }
    }
}
