//! External collaborators of the download engine
//!
//! The engine never talks to the network, the filesystem layout, or the user
//! directly. Each of those concerns sits behind a trait so front-ends can plug in
//! their own implementations:
//!
//! - [`SessionClient`]: connection and login state
//! - [`Searcher`]: source searches, single-track search-and-download, folder completion
//! - [`Organizer`]: final file layout
//! - [`SourceRemover`]: removing satisfied items from their input
//! - [`IndexSink`] / [`RunIndex`]: durable progress records
//! - [`FileIndex`]: local duplicate detection
//! - [`Interaction`]: line prompts for interactive mode
//!
//! No-op implementations are provided for the optional concerns.

mod noop;
mod traits;

pub use noop::{NoInteraction, NoOpIndexSink, NoOpOrganizer, NoOpSourceRemover};
pub use traits::{
    DownloadedFile, FileIndex, IndexSink, Interaction, Organizer, RunIndex, SessionClient,
    SessionState, Searcher, SourceRemover, TransferContext,
};

use std::sync::Arc;

/// The set of collaborators a [`BatchDownloader`](crate::BatchDownloader) runs against
#[derive(Clone)]
pub struct Services {
    /// Session client
    pub session: Arc<dyn SessionClient>,
    /// Search and transfer
    pub searcher: Arc<dyn Searcher>,
    /// File layout
    pub organizer: Arc<dyn Organizer>,
    /// Source removal
    pub source_remover: Arc<dyn SourceRemover>,
    /// User prompts
    pub interaction: Arc<dyn Interaction>,
}

impl Services {
    /// Bundle the required collaborators with no-op defaults for the rest
    pub fn new(session: Arc<dyn SessionClient>, searcher: Arc<dyn Searcher>) -> Self {
        Self {
            session,
            searcher,
            organizer: Arc::new(NoOpOrganizer),
            source_remover: Arc::new(NoOpSourceRemover),
            interaction: Arc::new(NoInteraction),
        }
    }

    /// Use a file organizer
    #[must_use]
    pub fn with_organizer(mut self, organizer: Arc<dyn Organizer>) -> Self {
        self.organizer = organizer;
        self
    }

    /// Use a source remover
    #[must_use]
    pub fn with_source_remover(mut self, source_remover: Arc<dyn SourceRemover>) -> Self {
        self.source_remover = source_remover;
        self
    }

    /// Use an interaction front-end
    #[must_use]
    pub fn with_interaction(mut self, interaction: Arc<dyn Interaction>) -> Self {
        self.interaction = interaction;
        self
    }
}
