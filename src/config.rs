//! Configuration types for batchdl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Download behavior configuration (output, concurrency, retries)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output directory (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum concurrent single-track transfers (default: 2)
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Attempts per track for unclassified faults (default: 2)
    #[serde(default = "default_unknown_error_retries")]
    pub unknown_error_retries: u32,

    /// A transfer without progress for this long is cancelled (default: 50 seconds)
    #[serde(default = "default_max_stale_time", with = "duration_serde")]
    pub max_stale_time: Duration,

    /// Ask the input source to drop items once they are downloaded
    #[serde(default)]
    pub remove_tracks_from_source: bool,

    /// Start in interactive album selection mode
    #[serde(default)]
    pub interactive: bool,

    /// Run album source searches for upcoming items concurrently
    #[serde(default)]
    pub parallel_album_search: bool,

    /// Maximum concurrent album source searches (default: 5)
    #[serde(default = "default_parallel_album_search_processes")]
    pub parallel_album_search_processes: usize,

    /// Only report the tracks that would be downloaded
    #[serde(default)]
    pub print_tracks: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrent_downloads: default_concurrent_downloads(),
            unknown_error_retries: default_unknown_error_retries(),
            max_stale_time: default_max_stale_time(),
            remove_tracks_from_source: false,
            interactive: false,
            parallel_album_search: false,
            parallel_album_search_processes: default_parallel_album_search_processes(),
            print_tracks: false,
        }
    }
}

/// What happens to the files of a failed or cancelled album
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumFailAction {
    /// Delete the downloaded files
    Delete,
    /// Move them below the failed-album path (default)
    #[default]
    Quarantine,
    /// Leave them where they are
    Ignore,
}

/// Supplementary image download policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumArtOption {
    /// Only the images that came with the album
    #[default]
    Default,
    /// The largest image available
    Largest,
    /// As many images as available
    Most,
}

/// Album download configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlbumConfig {
    /// Action on album failure
    #[serde(default)]
    pub fail_action: AlbumFailAction,

    /// Quarantine directory for failed albums (default: "<output_dir>/failed")
    #[serde(default)]
    pub failed_album_path: Option<PathBuf>,

    /// Fetch the remaining files of the remote folder after a successful album download (default: true)
    #[serde(default = "default_true")]
    pub browse_folder: bool,

    /// Supplementary image policy
    #[serde(default)]
    pub album_art: AlbumArtOption,

    /// Skip the album download and only fetch images
    #[serde(default)]
    pub album_art_only: bool,

    /// Allowed track length difference in seconds when comparing albums (default: 3)
    #[serde(default = "default_length_tolerance")]
    pub length_tolerance: u32,

    /// Switch to interactive mode after the user cancels an album (default: true)
    #[serde(default = "default_true")]
    pub enter_interactive_on_cancel: bool,

    /// Concurrency cap for tracks within one album (None = unbounded)
    #[serde(default)]
    pub album_concurrency: Option<usize>,
}

impl Default for AlbumConfig {
    fn default() -> Self {
        Self {
            fail_action: AlbumFailAction::default(),
            failed_album_path: None,
            browse_folder: true,
            album_art: AlbumArtOption::default(),
            album_art_only: false,
            length_tolerance: default_length_tolerance(),
            enter_interactive_on_cancel: true,
            album_concurrency: None,
        }
    }
}

/// Local-state gate configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkipConfig {
    /// Skip tracks that already exist in the output directory (default: true)
    #[serde(default = "default_true")]
    pub skip_existing: bool,

    /// Skip tracks a prior run could not find
    #[serde(default)]
    pub skip_not_found: bool,

    /// Additional music library checked after the output directory
    #[serde(default)]
    pub music_dir: Option<PathBuf>,
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self {
            skip_existing: true,
            skip_not_found: false,
            music_dir: None,
        }
    }
}

/// Search rate limiting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Searches allowed per window (default: 34)
    #[serde(default = "default_searches_per_window")]
    pub searches_per_window: usize,

    /// Length of the rolling window (default: 220 seconds)
    #[serde(default = "default_search_window", with = "duration_serde")]
    pub window: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            searches_per_window: default_searches_per_window(),
            window: default_search_window(),
        }
    }
}

/// Session and liveness configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Login username
    #[serde(default)]
    pub username: String,

    /// Login password
    #[serde(default)]
    pub password: String,

    /// Log in with random credentials
    #[serde(default)]
    pub random_login: bool,

    /// Login retry behavior (default: 2 retries, 500 ms apart)
    #[serde(default = "default_login_retry")]
    pub login_retry: RetryConfig,

    /// Poll interval while waiting for the session to come back (default: 1 second)
    #[serde(default = "default_login_poll_interval", with = "millis_serde")]
    pub login_poll_interval: Duration,

    /// Watchdog tick interval (default: 100 ms)
    #[serde(default = "default_watchdog_interval", with = "millis_serde")]
    pub watchdog_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            random_login: false,
            login_retry: default_login_retry(),
            login_poll_interval: default_login_poll_interval(),
            watchdog_interval: default_watchdog_interval(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Regex replacement applied to one track field
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegexReplacement {
    /// Pattern to search for
    pub pattern: String,
    /// Replacement text (supports `$1` style groups)
    #[serde(default)]
    pub replacement: String,
}

/// Track preprocessing applied before an item is searched
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Strip "feat." / "ft." credits from titles and artists
    #[serde(default)]
    pub remove_ft: bool,

    /// Strip `[...]` groups from titles
    #[serde(default)]
    pub remove_brackets: bool,

    /// Mark every artist as possibly wrong
    #[serde(default)]
    pub artist_maybe_wrong: bool,

    /// Replacement applied to titles
    #[serde(default)]
    pub title_regex: Option<RegexReplacement>,

    /// Replacement applied to artists
    #[serde(default)]
    pub artist_regex: Option<RegexReplacement>,

    /// Replacement applied to albums
    #[serde(default)]
    pub album_regex: Option<RegexReplacement>,
}

impl PreprocessConfig {
    /// Whether any preprocessing step is enabled
    pub fn is_enabled(&self) -> bool {
        self.remove_ft
            || self.remove_brackets
            || self.artist_maybe_wrong
            || self.title_regex.is_some()
            || self.artist_regex.is_some()
            || self.album_regex.is_some()
    }
}

/// Run index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Record track outcomes in the run index (default: true)
    #[serde(default = "default_true")]
    pub write_index: bool,

    /// Run index location (default: "<output_dir>/_index.db")
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            write_index: true,
            index_path: None,
        }
    }
}

/// Main configuration for the batch downloader
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Album handling
    #[serde(default)]
    pub album: AlbumConfig,

    /// Local-state gates
    #[serde(default)]
    pub skip: SkipConfig,

    /// Search rate limiting
    #[serde(default)]
    pub search: SearchConfig,

    /// Session and watchdog
    #[serde(default)]
    pub session: SessionConfig,

    /// Track preprocessing
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Run index
    #[serde(default)]
    pub index: IndexConfig,

    /// Post-completion commands, in order
    #[serde(default)]
    pub on_complete: Vec<OnCompleteCommand>,
}

impl Config {
    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "concurrent_downloads must be at least 1".into(),
                key: Some("download.concurrent_downloads".into()),
            });
        }
        if self.download.unknown_error_retries == 0 {
            return Err(Error::Config {
                message: "unknown_error_retries must be at least 1".into(),
                key: Some("download.unknown_error_retries".into()),
            });
        }
        if self.download.parallel_album_search_processes == 0 {
            return Err(Error::Config {
                message: "parallel_album_search_processes must be at least 1".into(),
                key: Some("download.parallel_album_search_processes".into()),
            });
        }
        if self.search.searches_per_window == 0 {
            return Err(Error::Config {
                message: "searches_per_window must be at least 1".into(),
                key: Some("search.searches_per_window".into()),
            });
        }
        if self.album.album_concurrency == Some(0) {
            return Err(Error::Config {
                message: "album_concurrency must be at least 1 when set".into(),
                key: Some("album.album_concurrency".into()),
            });
        }
        for (key, replacement) in [
            ("preprocess.title_regex", &self.preprocess.title_regex),
            ("preprocess.artist_regex", &self.preprocess.artist_regex),
            ("preprocess.album_regex", &self.preprocess.album_regex),
        ] {
            if let Some(r) = replacement
                && let Err(e) = regex::Regex::new(&r.pattern)
            {
                return Err(Error::Config {
                    message: format!("invalid regex '{}': {}", r.pattern, e),
                    key: Some(key.into()),
                });
            }
        }
        Ok(())
    }

    /// Quarantine directory for failed albums
    pub fn failed_album_path(&self) -> PathBuf {
        self.album
            .failed_album_path
            .clone()
            .unwrap_or_else(|| self.download.output_dir.join("failed"))
    }

    /// Run index location
    pub fn index_path(&self) -> PathBuf {
        self.index
            .index_path
            .clone()
            .unwrap_or_else(|| self.download.output_dir.join("_index.db"))
    }

    /// Whether any post-completion command is configured
    pub fn has_on_complete(&self) -> bool {
        self.on_complete.iter().any(|c| !c.command.trim().is_empty())
    }

    /// Whether this run never transfers files
    pub fn does_not_download(&self) -> bool {
        self.download.print_tracks
    }
}

/// One post-completion command with its parsed option prefixes
///
/// The textual form is a command line preceded by any number of two-character
/// prefixes: `s:` run through the shell, `a:` album-level only, `h:` hidden
/// window, `u:` update the track from the command's `state;path` output,
/// `r:` capture output, and `<digit>:` only run for tracks in that state code.
/// Scanning stops at the first unrecognized prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnCompleteCommand {
    /// Run the command through the system shell
    pub shell: bool,
    /// Only run for album-level completions
    pub album_level: bool,
    /// Hide the process window (no effect on Unix)
    pub hidden: bool,
    /// Parse stdout as `state;path` and apply it to the track
    pub update_from_output: bool,
    /// Capture stdout/stderr for later placeholders
    pub read_output: bool,
    /// Only run when the track's state code matches
    pub required_state: Option<u8>,
    /// Command line with placeholders
    pub command: String,
}

impl OnCompleteCommand {
    /// Whether output is captured
    pub fn captures_output(&self) -> bool {
        self.read_output || self.update_from_output
    }
}

impl FromStr for OnCompleteCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parsed = OnCompleteCommand::default();
        let mut rest = s;

        while rest.len() > 2 {
            let bytes = rest.as_bytes();
            if bytes[1] != b':' {
                break;
            }
            match bytes[0] {
                b's' => parsed.shell = true,
                b'a' => parsed.album_level = true,
                b'h' => parsed.hidden = true,
                b'u' => parsed.update_from_output = true,
                b'r' => parsed.read_output = true,
                d @ b'0'..=b'9' => parsed.required_state = Some(d - b'0'),
                _ => break,
            }
            rest = &rest[2..];
        }

        parsed.command = rest.to_string();
        Ok(parsed)
    }
}

impl TryFrom<String> for OnCompleteCommand {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OnCompleteCommand> for String {
    fn from(c: OnCompleteCommand) -> Self {
        let mut out = String::new();
        for (set, prefix) in [
            (c.shell, "s:"),
            (c.album_level, "a:"),
            (c.hidden, "h:"),
            (c.update_from_output, "u:"),
            (c.read_output, "r:"),
        ] {
            if set {
                out.push_str(prefix);
            }
        }
        if let Some(code) = c.required_state {
            out.push_str(&format!("{code}:"));
        }
        out.push_str(&c.command);
        out
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_concurrent_downloads() -> usize {
    2
}

fn default_unknown_error_retries() -> u32 {
    2
}

fn default_max_stale_time() -> Duration {
    Duration::from_secs(50)
}

fn default_parallel_album_search_processes() -> usize {
    5
}

fn default_length_tolerance() -> u32 {
    3
}

fn default_searches_per_window() -> usize {
    34
}

fn default_search_window() -> Duration {
    Duration::from_secs(220)
}

fn default_login_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_millis(500),
        backoff_multiplier: 1.0,
        jitter: false,
    }
}

fn default_login_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_watchdog_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.download.concurrent_downloads, 2);
        assert_eq!(config.download.unknown_error_retries, 2);
        assert_eq!(config.download.max_stale_time, Duration::from_secs(50));
        assert_eq!(config.download.parallel_album_search_processes, 5);
        assert_eq!(config.album.fail_action, AlbumFailAction::Quarantine);
        assert!(config.album.browse_folder);
        assert!(config.skip.skip_existing);
        assert!(!config.skip.skip_not_found);
        assert_eq!(config.search.searches_per_window, 34);
        assert_eq!(config.session.watchdog_interval, Duration::from_millis(100));
        assert_eq!(config.session.login_retry.max_attempts, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.download.concurrent_downloads, 2);
        assert_eq!(config.album.length_tolerance, 3);
        assert_eq!(
            config.session.login_retry.initial_delay,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn derived_paths_follow_output_dir() {
        let mut config = Config::default();
        config.download.output_dir = PathBuf::from("/music");
        assert_eq!(config.failed_album_path(), PathBuf::from("/music/failed"));
        assert_eq!(config.index_path(), PathBuf::from("/music/_index.db"));

        config.album.failed_album_path = Some(PathBuf::from("/quarantine"));
        assert_eq!(config.failed_album_path(), PathBuf::from("/quarantine"));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.download.concurrent_downloads = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("download.concurrent_downloads"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_bad_regex() {
        let mut config = Config::default();
        config.preprocess.title_regex = Some(RegexReplacement {
            pattern: "(unclosed".into(),
            replacement: String::new(),
        });
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn from_json_file_reads_nested_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "download": {{ "output_dir": "/out", "concurrent_downloads": 4 }},
                "album": {{ "fail_action": "delete", "album_art": "largest" }},
                "session": {{ "username": "me", "watchdog_interval": 50 }},
                "on_complete": ["a:s:echo {{path}}"]
            }}"#
        )
        .unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.download.output_dir, PathBuf::from("/out"));
        assert_eq!(config.download.concurrent_downloads, 4);
        assert_eq!(config.album.fail_action, AlbumFailAction::Delete);
        assert_eq!(config.album.album_art, AlbumArtOption::Largest);
        assert_eq!(config.session.username, "me");
        assert_eq!(config.session.watchdog_interval, Duration::from_millis(50));
        assert!(config.on_complete[0].album_level);
        assert!(config.on_complete[0].shell);
        assert_eq!(config.on_complete[0].command, "echo {path}");
    }

    #[test]
    fn from_json_file_missing_file_is_io_error() {
        let result = Config::from_json_file("/definitely/not/here.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    // --- on-complete prefix parsing ---

    #[test]
    fn prefixes_are_stripped_in_order() {
        let cmd: OnCompleteCommand = "s:u:1:notify {path}".parse().unwrap();
        assert!(cmd.shell);
        assert!(cmd.update_from_output);
        assert_eq!(cmd.required_state, Some(1));
        assert!(!cmd.album_level);
        assert_eq!(cmd.command, "notify {path}");
    }

    #[test]
    fn unknown_prefix_stops_scan() {
        let cmd: OnCompleteCommand = "a:x:r:cmd".parse().unwrap();
        assert!(cmd.album_level);
        assert!(!cmd.read_output);
        assert_eq!(cmd.command, "x:r:cmd");
    }

    #[test]
    fn windows_drive_path_is_not_a_prefix() {
        let cmd: OnCompleteCommand = "C:\\tools\\tag.exe {path}".parse().unwrap();
        assert_eq!(cmd.command, "C:\\tools\\tag.exe {path}");
        assert!(!cmd.shell);
    }

    #[test]
    fn short_command_keeps_its_text() {
        let cmd: OnCompleteCommand = "s:".parse().unwrap();
        assert!(!cmd.shell);
        assert_eq!(cmd.command, "s:");
    }

    #[test]
    fn textual_form_survives_serialization() {
        let cmd: OnCompleteCommand = "h:r:3:beet import {path}".parse().unwrap();
        let json = serde_json::to_string(&cmd).unwrap();
        let back: OnCompleteCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn has_on_complete_ignores_blank_commands() {
        let mut config = Config::default();
        assert!(!config.has_on_complete());
        config.on_complete.push("   ".parse().unwrap());
        assert!(!config.has_on_complete());
        config.on_complete.push("echo hi".parse().unwrap());
        assert!(config.has_on_complete());
    }
}
