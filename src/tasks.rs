//! Collaborator contracts for the expensive analysis work the pipeline
//! schedules: media-info extraction, subtitle probing, audio fingerprinting
//! and per-season fingerprint aggregation.
//!
//! Each call takes a cancellation token and reports a [`TaskOutcome`];
//! failures surface as errors and are isolated per item at the work-item
//! boundary in the pipeline.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::{Episode, EpisodeId, SeasonId};

/// Result of a collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The work ran. `throttled_remote_work` is true when the call hit a
    /// shared external engine that benefits from pacing.
    Completed { throttled_remote_work: bool },
    /// The item is not yet eligible (e.g. media info missing). Not an error;
    /// the item is reconsidered on a later sweep.
    Skipped,
}

impl TaskOutcome {
    pub fn throttled_remote_work(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Completed {
                throttled_remote_work: true
            }
        )
    }
}

/// Media-info probing through the shared transcoding engine.
#[async_trait]
pub trait MediaInfoExtractor: Send + Sync {
    /// Probe the item, persisting media info on the library side.
    async fn extract(&self, episode: &Episode, token: &CancellationToken) -> Result<TaskOutcome>;

    /// Whether the item already has media info, used by the default batch
    /// filter to avoid re-probing.
    fn is_extracted(&self, episode: &Episode) -> bool;

    /// Whether a successfully extracted item qualifies for intro detection
    /// (episode of a series, eligible library).
    fn qualifies_for_detection(&self, episode: &Episode) -> bool;
}

/// External subtitle discovery for an item's container folder.
#[async_trait]
pub trait SubtitleProber: Send + Sync {
    async fn probe(&self, episode: &Episode, token: &CancellationToken) -> Result<TaskOutcome>;
}

/// Per-episode audio fingerprinting through the shared fingerprint engine.
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, episode: &Episode, token: &CancellationToken)
        -> Result<TaskOutcome>;
}

/// An intro candidate produced by season-level fingerprint aggregation.
#[derive(Debug, Clone, Copy)]
pub struct MarkerCandidate {
    pub episode: EpisodeId,
    pub intro_start_ticks: i64,
    pub intro_end_ticks: i64,
}

/// Phase-2 collaborator: correlates the fingerprint sequences of a season's
/// episodes into per-episode intro candidates.
#[async_trait]
pub trait SeasonAggregator: Send + Sync {
    async fn aggregate(
        &self,
        season: SeasonId,
        episodes: &[Episode],
        token: &CancellationToken,
    ) -> Result<Vec<MarkerCandidate>>;
}
