//! Season marker propagation: copy/derive markers onto sibling episodes that
//! lack them.
//!
//! Intro offsets are assumed stable across episodes of the same season and
//! are copied verbatim from an anchor. Credits offsets are derived from the
//! anchor's distance to its own run end, recomputed against each sibling's
//! run length.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::model::{self, Episode, Marker, MarkerKind, SeasonId};
use crate::store::{LibraryQuery, MarkerStore};

/// Intro anchor: both intro boundaries from one equipped episode.
#[derive(Debug, Clone, Copy)]
struct IntroAnchor {
    start: Marker,
    end: Marker,
}

/// Credits anchor: a credits boundary plus the anchor's run length.
#[derive(Debug, Clone, Copy)]
struct CreditsAnchor {
    start_ticks: i64,
    runtime_ticks: i64,
}

/// Copies/derives markers onto season siblings lacking them.
pub struct SeasonPropagator {
    store: Arc<dyn MarkerStore>,
    library: Arc<dyn LibraryQuery>,
}

impl SeasonPropagator {
    pub fn new(store: Arc<dyn MarkerStore>, library: Arc<dyn LibraryQuery>) -> Self {
        Self { store, library }
    }

    /// Propagate within every season represented in a batch of episodes that
    /// newly received markers. Per-season failures are logged and do not
    /// abort the rest of the batch.
    pub async fn propagate_batch(&self, updated: &[Episode]) -> usize {
        let seasons: HashSet<SeasonId> = updated.iter().map(|e| e.season_id).collect();
        let mut filled = 0;
        for season in seasons {
            match self.propagate_season(season).await {
                Ok(n) => filled += n,
                Err(e) => {
                    tracing::warn!(
                        season_id = %season,
                        error = %e,
                        "Season marker propagation failed"
                    );
                }
            }
        }
        filled
    }

    /// Scan one season for anchors and fill in episodes lacking markers.
    /// Returns the number of episodes that received new markers.
    pub async fn propagate_season(&self, season: SeasonId) -> Result<usize> {
        let episodes = self.library.episodes_in_season(season).await?;
        if episodes.is_empty() {
            return Ok(0);
        }

        let mut markers = Vec::with_capacity(episodes.len());
        for episode in &episodes {
            markers.push(self.store.get_markers(episode.id).await?);
        }

        // Scan backward from the latest index; stop once both anchors are
        // found or the season is exhausted.
        let mut intro_anchor: Option<IntroAnchor> = None;
        let mut credits_anchor: Option<CreditsAnchor> = None;
        for (episode, list) in episodes.iter().zip(markers.iter()).rev() {
            if intro_anchor.is_none() {
                let start = model::marker_of_kind(list, MarkerKind::IntroStart);
                let end = model::marker_of_kind(list, MarkerKind::IntroEnd);
                if let (Some(start), Some(end)) = (start, end) {
                    intro_anchor = Some(IntroAnchor {
                        start: *start,
                        end: *end,
                    });
                }
            }
            if credits_anchor.is_none() {
                if let (Some(credits), Some(runtime_ticks)) = (
                    model::marker_of_kind(list, MarkerKind::CreditsStart),
                    episode.runtime_ticks,
                ) {
                    credits_anchor = Some(CreditsAnchor {
                        start_ticks: credits.start_ticks,
                        runtime_ticks,
                    });
                }
            }
            if intro_anchor.is_some() && credits_anchor.is_some() {
                break;
            }
        }

        if intro_anchor.is_none() && credits_anchor.is_none() {
            return Ok(0);
        }

        let mut filled = 0;
        for (episode, list) in episodes.iter().zip(markers.iter()) {
            let mut new = Vec::new();

            if let Some(anchor) = intro_anchor {
                let has_intro = model::marker_of_kind(list, MarkerKind::IntroStart).is_some()
                    && model::marker_of_kind(list, MarkerKind::IntroEnd).is_some();
                if !has_intro {
                    new.push(anchor.start);
                    new.push(anchor.end);
                }
            }

            if let Some(anchor) = credits_anchor {
                let has_credits =
                    model::marker_of_kind(list, MarkerKind::CreditsStart).is_some();
                if !has_credits {
                    if let Some(runtime_ticks) = episode.runtime_ticks {
                        let tail = anchor.runtime_ticks - anchor.start_ticks;
                        let start_ticks = runtime_ticks - tail;
                        if start_ticks > 0 {
                            new.push(Marker::detected(MarkerKind::CreditsStart, start_ticks));
                        }
                    }
                }
            }

            if new.is_empty() {
                continue;
            }

            let merged = model::merge_markers(list, &new);
            self.store.save_markers(episode.id, merged).await?;
            filled += 1;
            tracing::debug!(
                episode_id = %episode.id,
                episode = %episode.name,
                markers = new.len(),
                "Propagated season markers"
            );
        }

        if filled > 0 {
            tracing::info!(season_id = %season, episodes = filled, "Propagated markers to season siblings");
        }
        Ok(filled)
    }
}
