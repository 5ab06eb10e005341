//! Session supervision and stall detection.

use tokio::time::MissedTickBehavior;

use crate::types::Event;

use super::BatchDownloader;

impl BatchDownloader {
    /// One watchdog pass
    ///
    /// While logged in, finished searches are pruned and stalled transfers are
    /// cancelled. While disconnected, transfers are kept fresh so the outage is
    /// not mistaken for a stall, and a login is attempted unless one is already
    /// underway. Pending key presses are dispatched either way.
    pub(crate) async fn watchdog_tick(&self) {
        if self.session.is_logged_in() {
            let pruned = self.session.prune_searches();
            if pruned > 0 {
                tracing::trace!(pruned, "Pruned finished searches");
            }

            for key in self
                .session
                .cancel_stalled(self.config.download.max_stale_time)
            {
                tracing::warn!(transfer = %key, "Transfer stalled, cancelling");
                self.emit_event(Event::TransferStalled { key });
            }
        } else {
            self.session.refresh_transfers();
            if self.session.reconnect_if_needed().await {
                self.emit_event(Event::Disconnected);
            }
        }

        self.commands.dispatch();
    }

    /// Start the watchdog loop; it runs until [`shutdown`](Self::shutdown)
    pub(crate) fn spawn_watchdog(&self) {
        let this = self.clone();
        let shutdown = self.run.shutdown.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.session.watchdog_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(interval = ?this.config.session.watchdog_interval, "Watchdog started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Watchdog stopped");
                        return;
                    }
                    _ = interval.tick() => this.watchdog_tick().await,
                }
            }
        });
    }
}
