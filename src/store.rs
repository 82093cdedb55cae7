//! Collaborator contracts to the surrounding library, plus an in-memory
//! implementation used by the test suite and for dry runs.
//!
//! Callers of [`MarkerStore::save_markers`] pre-filter and re-sort via
//! [`crate::model::merge_markers`]; the store is expected to replace the item's
//! marker list atomically.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{Episode, EpisodeId, Marker, SeasonId};

/// Persistence boundary for chapter markers.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Fetch the ordered marker list for an item. Unknown items yield an
    /// empty list.
    async fn get_markers(&self, episode: EpisodeId) -> Result<Vec<Marker>>;

    /// Atomically replace the marker list for an item.
    async fn save_markers(&self, episode: EpisodeId, markers: Vec<Marker>) -> Result<()>;
}

/// Read access to the library hierarchy, used to discover season siblings.
#[async_trait]
pub trait LibraryQuery: Send + Sync {
    /// All episodes of a season, ordered by index number.
    async fn episodes_in_season(&self, season: SeasonId) -> Result<Vec<Episode>>;
}

/// In-memory [`MarkerStore`] + [`LibraryQuery`] backed by [`DashMap`].
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    markers: DashMap<EpisodeId, Vec<Marker>>,
    episodes: DashMap<SeasonId, Vec<Episode>>,
}

impl MemoryLibrary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an episode under its season.
    pub fn add_episode(&self, episode: Episode) {
        let mut season = self.episodes.entry(episode.season_id).or_default();
        season.push(episode);
        season.sort_by_key(|e| e.index_number);
    }

    /// Overwrite an item's markers directly, bypassing merge logic. Test setup
    /// helper.
    pub fn set_markers(&self, episode: EpisodeId, markers: Vec<Marker>) {
        self.markers.insert(episode, markers);
    }

    /// Snapshot of an item's markers without going through the trait.
    pub fn markers_of(&self, episode: EpisodeId) -> Vec<Marker> {
        self.markers
            .get(&episode)
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MarkerStore for MemoryLibrary {
    async fn get_markers(&self, episode: EpisodeId) -> Result<Vec<Marker>> {
        Ok(self.markers_of(episode))
    }

    async fn save_markers(&self, episode: EpisodeId, markers: Vec<Marker>) -> Result<()> {
        self.markers.insert(episode, markers);
        Ok(())
    }
}

#[async_trait]
impl LibraryQuery for MemoryLibrary {
    async fn episodes_in_season(&self, season: SeasonId) -> Result<Vec<Episode>> {
        Ok(self
            .episodes
            .get(&season)
            .map(|e| e.clone())
            .unwrap_or_default())
    }
}
