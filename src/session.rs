//! Session health and the registries of in-flight searches and transfers
//!
//! [`Session`] is constructed once per [`BatchDownloader`](crate::BatchDownloader)
//! and shared by the per-track tasks (which register their transfers) and the
//! watchdog (which prunes searches, cancels stalled transfers and logs back in).

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::retry::retry_with_backoff;
use crate::services::SessionClient;

const CREDENTIAL_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CREDENTIAL_LEN: usize = 10;

#[derive(Debug)]
struct ProgressInner {
    last_change: Mutex<Instant>,
    stalled: AtomicBool,
}

/// Progress handle of one transfer
///
/// The searcher calls [`touch`](TransferProgress::touch) whenever bytes arrive
/// or the transfer changes state. Clones share the same handle.
#[derive(Clone, Debug)]
pub struct TransferProgress {
    inner: Arc<ProgressInner>,
}

impl TransferProgress {
    fn new() -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                last_change: Mutex::new(Instant::now()),
                stalled: AtomicBool::new(false),
            }),
        }
    }

    /// Record progress now
    pub fn touch(&self) {
        *self
            .inner
            .last_change
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Time since the last recorded progress
    pub fn idle_for(&self) -> Duration {
        self.inner
            .last_change
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Whether the watchdog declared this transfer stalled
    pub fn is_stalled(&self) -> bool {
        self.inner.stalled.load(Ordering::SeqCst)
    }

    fn mark_stalled(&self) {
        self.inner.stalled.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct TransferEntry {
    name: String,
    progress: TransferProgress,
    cancel: CancellationToken,
}

/// Registration of an in-flight transfer; deregisters on drop
#[derive(Debug)]
pub struct TransferGuard {
    key: String,
    transfers: Arc<Mutex<HashMap<String, TransferEntry>>>,
    /// Token cancelled by the watchdog or the parent batch
    pub cancel: CancellationToken,
    /// Progress handle to give to the searcher
    pub progress: TransferProgress,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Registration of an in-flight source search; marks itself finished on drop
#[derive(Debug)]
pub struct SearchGuard {
    key: u64,
    searches: Arc<Mutex<HashMap<u64, Option<String>>>>,
}

impl Drop for SearchGuard {
    fn drop(&mut self) {
        if let Some(entry) = self
            .searches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&self.key)
        {
            *entry = None;
        }
    }
}

/// Shared session state
#[derive(Clone)]
pub struct Session {
    client: Arc<dyn SessionClient>,
    config: SessionConfig,
    searches: Arc<Mutex<HashMap<u64, Option<String>>>>,
    transfers: Arc<Mutex<HashMap<String, TransferEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl Session {
    /// Create a session around a client
    pub fn new(client: Arc<dyn SessionClient>, config: SessionConfig) -> Self {
        Self {
            client,
            config,
            searches: Arc::new(Mutex::new(HashMap::new())),
            transfers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the client is connected and logged in
    pub fn is_logged_in(&self) -> bool {
        self.client.state().is_logged_in()
    }

    /// Suspend until the client reports a logged-in session
    pub async fn wait_for_login(&self) {
        loop {
            let state = self.client.state();
            if state.is_logged_in() {
                return;
            }
            tracing::debug!(?state, "Waiting for login");
            tokio::time::sleep(self.config.login_poll_interval).await;
        }
    }

    /// Log in, retrying per the login retry configuration
    ///
    /// Unreachable-server and timeout errors are retried without using up an
    /// attempt.
    pub async fn login(&self) -> Result<()> {
        let (username, password) = if self.config.random_login {
            (random_credential(), random_credential())
        } else {
            (self.config.username.clone(), self.config.password.clone())
        };

        tracing::info!(user = %username, "Logging in");
        retry_with_backoff(&self.config.login_retry, || {
            self.client.connect(&username, &password)
        })
        .await?;
        tracing::debug!(user = %username, "Logged in");
        Ok(())
    }

    /// Log in unless already logged in or a login is underway
    ///
    /// Returns whether a login was attempted. Failures are logged.
    pub async fn reconnect_if_needed(&self) -> bool {
        let state = self.client.state();
        if state.is_logged_in() || state.is_in_progress() {
            return false;
        }

        tracing::warn!("Disconnected, logging in");
        if let Err(e) = self.login().await {
            if self.config.random_login {
                tracing::warn!(error = %e, "Login failed");
            } else {
                tracing::warn!(
                    error = %e,
                    "Login failed (possibly a temporary ban caused by frequent searches)"
                );
            }
        }
        true
    }

    /// Register a source search
    pub fn begin_search(&self, name: impl Into<String>) -> SearchGuard {
        let key = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.searches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Some(name.into()));
        SearchGuard {
            key,
            searches: self.searches.clone(),
        }
    }

    /// Drop finished searches from the registry, returning how many were removed
    pub fn prune_searches(&self) -> usize {
        let mut searches = self.searches.lock().unwrap_or_else(|e| e.into_inner());
        let before = searches.len();
        searches.retain(|_, entry| entry.is_some());
        before - searches.len()
    }

    /// Number of searches still running
    pub fn active_searches(&self) -> usize {
        self.searches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|e| e.is_some())
            .count()
    }

    /// Register a transfer under a child of `parent`
    pub fn register_transfer(
        &self,
        name: impl Into<String>,
        parent: &CancellationToken,
    ) -> TransferGuard {
        let name = name.into();
        let key = format!("{}:{}", self.next_id.fetch_add(1, Ordering::Relaxed), name);
        let cancel = parent.child_token();
        let progress = TransferProgress::new();

        self.transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                key.clone(),
                TransferEntry {
                    name,
                    progress: progress.clone(),
                    cancel: cancel.clone(),
                },
            );

        TransferGuard {
            key,
            transfers: self.transfers.clone(),
            cancel,
            progress,
        }
    }

    /// Number of registered transfers
    pub fn active_transfers(&self) -> usize {
        self.transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Cancel and evict transfers idle for longer than `max_stale`
    ///
    /// Returns the names of the evicted transfers.
    pub fn cancel_stalled(&self, max_stale: Duration) -> Vec<String> {
        let mut transfers = self.transfers.lock().unwrap_or_else(|e| e.into_inner());
        let stalled: Vec<String> = transfers
            .iter()
            .filter(|(_, t)| t.progress.idle_for() > max_stale)
            .map(|(key, _)| key.clone())
            .collect();

        stalled
            .into_iter()
            .filter_map(|key| transfers.remove(&key))
            .map(|entry| {
                entry.progress.mark_stalled();
                entry.cancel.cancel();
                entry.name
            })
            .collect()
    }

    /// Push every transfer's last-change time to now
    ///
    /// Used while the session is down so the outage does not count as a stall.
    pub fn refresh_transfers(&self) {
        for entry in self
            .transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
        {
            entry.progress.touch();
        }
    }
}

/// Random login credential: 10 characters from `A-Z0-9`
pub fn random_credential() -> String {
    let mut rng = rand::thread_rng();
    (0..CREDENTIAL_LEN)
        .map(|_| CREDENTIAL_CHARS[rng.gen_range(0..CREDENTIAL_CHARS.len())] as char)
        .collect()
}
