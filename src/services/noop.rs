//! No-op collaborators for optional concerns

use async_trait::async_trait;

use super::traits::{IndexSink, Interaction, Organizer, SourceRemover};
use crate::error::Result;
use crate::types::{Candidate, Track, TrackLists};

/// Organizer that leaves files where the searcher wrote them
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpOrganizer;

impl Organizer for NoOpOrganizer {
    fn organize_track(
        &self,
        _track: &mut Track,
        _file: Option<&Candidate>,
        _remote_dir: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn organize_album(&self, _source: &Track, _tracks: &mut [Track]) -> Result<()> {
        Ok(())
    }
}

/// Source remover for inputs that cannot be modified
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpSourceRemover;

#[async_trait]
impl SourceRemover for NoOpSourceRemover {
    async fn remove_track_from_source(&self, track: &Track) -> Result<()> {
        tracing::debug!(track = %track, "Source removal not supported by input, ignoring");
        Ok(())
    }
}

/// Sink that persists nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpIndexSink;

#[async_trait]
impl IndexSink for NoOpIndexSink {
    async fn update(&self, _lists: &TrackLists) -> Result<()> {
        Ok(())
    }
}

/// Interaction that behaves like closed input
///
/// Every prompt answers with `None`, so the engine takes the default action.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInteraction;

#[async_trait]
impl Interaction for NoInteraction {
    async fn read_line(&self, _prompt: &str) -> Option<String> {
        None
    }
}
