//! # batchdl
//!
//! Batch download engine for peer-to-peer music sharing networks.
//!
//! ## Design Philosophy
//!
//! batchdl is designed to be:
//! - **Collaborator-driven** - Network, layout and prompts sit behind traits in [`services`]
//! - **Resumable** - A run index records outcomes so later runs skip what is done
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! A run takes an ordered list of wanted items (single tracks, albums,
//! aggregate queries) and resolves each one: local-state gates first, then a
//! source search where needed, then the downloads. Albums are all-or-nothing;
//! plain tracks are independent.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use batchdl::{BatchDownloader, Config, Services};
//! use batchdl::types::{Track, TrackLists, TrackType};
//! # use batchdl::services::{SessionClient, Searcher};
//!
//! # async fn example(
//! #     session: Arc<dyn SessionClient>,
//! #     searcher: Arc<dyn Searcher>,
//! # ) -> batchdl::Result<()> {
//! let lists = TrackLists::from_flattened([
//!     Track::new("Artist", "Song", "", TrackType::Normal),
//!     Track::new("Artist", "", "Record", TrackType::Album),
//! ]);
//!
//! let downloader =
//!     BatchDownloader::new(Config::default(), lists, Services::new(session, searcher)).await?;
//!
//! // Subscribe to events
//! let mut events = downloader.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let summary = downloader.run().await?;
//! println!("{} downloaded, {} failed", summary.downloaded, summary.failed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// User key presses and line prompts
pub mod commands;
/// Configuration types
pub mod config;
/// Run index persistence
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Local duplicate detection
pub mod file_index;
/// Search rate limiting
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// External collaborators
pub mod services;
/// Login state, active searches and transfers
pub mod session;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use commands::{CommandBus, StdinInteraction, UserCommand};
pub use config::{AlbumArtOption, AlbumFailAction, Config, OnCompleteCommand};
pub use db::Database;
pub use downloader::BatchDownloader;
pub use error::{Error, Result, SearchError};
pub use services::Services;
pub use types::{
    Event, FailureReason, RunSummary, Track, TrackListEntry, TrackLists, TrackState, TrackType,
};

/// Run a batch until it finishes or a termination signal arrives
///
/// On a signal the run is abandoned, the watchdog is stopped and
/// [`Error::Cancelled`] is returned. Items already processed keep their
/// recorded state.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use batchdl::{BatchDownloader, run_with_shutdown};
///
/// # async fn example(downloader: BatchDownloader) -> batchdl::Result<()> {
/// let summary = run_with_shutdown(&downloader).await?;
/// println!("{} failed", summary.failed);
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(downloader: &BatchDownloader) -> Result<RunSummary> {
    tokio::select! {
        result = downloader.run() => result,
        _ = wait_for_signal() => {
            tracing::info!("Abandoning run");
            downloader.shutdown();
            Err(Error::Cancelled)
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
