//! Marker update coordination: single-flight and cool-off deduplication of
//! per-episode marker writes.
//!
//! For each marker family (intro, credits) the coordinator keeps an in-flight
//! set and a last-write map under one family-scoped lock. The lock is held
//! only for map mutation, never across the asynchronous write itself. A
//! request for an episode with a write already in flight, or one written
//! within the cool-off window, is dropped — intentional de-duplication, not an
//! error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::model::{self, Episode, EpisodeId, Marker, MarkerKind};
use crate::notifications::NotificationManager;
use crate::propagate::SeasonPropagator;
use crate::store::{LibraryQuery, MarkerStore};

/// Two successful writes of the same family for one episode are separated by
/// at least this window.
pub const UPDATE_COOL_OFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerFamily {
    Intro,
    Credits,
}

impl MarkerFamily {
    fn name(self) -> &'static str {
        match self {
            MarkerFamily::Intro => "intro",
            MarkerFamily::Credits => "credits",
        }
    }
}

#[derive(Debug, Default)]
struct FamilyState {
    in_flight: HashSet<EpisodeId>,
    last_written: HashMap<EpisodeId, Instant>,
}

#[derive(Debug, Default)]
struct Family {
    state: Mutex<FamilyState>,
}

impl Family {
    /// Try to claim the episode for a write. Returns false when a write is in
    /// flight or inside the cool-off window.
    fn try_claim(&self, episode: EpisodeId, family: MarkerFamily) -> bool {
        let mut state = self.state.lock();
        if state.in_flight.contains(&episode) {
            tracing::debug!(
                episode_id = %episode,
                family = family.name(),
                "Dropping marker update; write already in flight"
            );
            return false;
        }
        if let Some(last) = state.last_written.get(&episode) {
            if last.elapsed() < UPDATE_COOL_OFF {
                tracing::debug!(
                    episode_id = %episode,
                    family = family.name(),
                    "Dropping marker update; inside cool-off window"
                );
                return false;
            }
        }
        state.in_flight.insert(episode);
        true
    }

    fn release(&self, episode: EpisodeId) {
        let mut state = self.state.lock();
        state.in_flight.remove(&episode);
        state.last_written.insert(episode, Instant::now());
    }
}

struct CoordinatorInner {
    store: Arc<dyn MarkerStore>,
    propagator: SeasonPropagator,
    notifications: NotificationManager,
    intro: Family,
    credits: Family,
}

/// Deduplicates and single-flights marker writes per episode, then fans out
/// to the marker store, sibling propagation and notification targets.
///
/// Cheap to clone; all clones share one deduplication state.
#[derive(Clone)]
pub struct MarkerUpdateCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl MarkerUpdateCoordinator {
    pub fn new(
        store: Arc<dyn MarkerStore>,
        library: Arc<dyn LibraryQuery>,
        notifications: NotificationManager,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                propagator: SeasonPropagator::new(store.clone(), library),
                store,
                notifications,
                intro: Family::default(),
                credits: Family::default(),
            }),
        }
    }

    /// Request an intro boundary write for an episode. Dropped when a write
    /// is in flight or recently completed.
    pub fn submit_intro(
        &self,
        episode: Episode,
        session_id: Option<String>,
        start: Duration,
        end: Duration,
    ) {
        if !self.inner.intro.try_claim(episode.id, MarkerFamily::Intro) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner
                .write_intro(&episode, session_id.as_deref(), start, end)
                .await;
            inner.intro.release(episode.id);
            if let Err(e) = result {
                tracing::warn!(
                    episode_id = %episode.id,
                    error = %e,
                    "Intro marker write failed"
                );
            }
        });
    }

    /// Request a credits boundary write. `remaining` is run length minus the
    /// observed position; the computed offset is only persisted when it is
    /// strictly positive and strictly below run length.
    pub fn submit_credits(&self, episode: Episode, session_id: Option<String>, remaining: Duration) {
        if !self
            .inner
            .credits
            .try_claim(episode.id, MarkerFamily::Credits)
        {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner
                .write_credits(&episode, session_id.as_deref(), remaining)
                .await;
            inner.credits.release(episode.id);
            if let Err(e) = result {
                tracing::warn!(
                    episode_id = %episode.id,
                    error = %e,
                    "Credits marker write failed"
                );
            }
        });
    }
}

impl CoordinatorInner {
    async fn write_intro(
        &self,
        episode: &Episode,
        session_id: Option<&str>,
        start: Duration,
        end: Duration,
    ) -> Result<()> {
        let new = vec![
            Marker::detected(MarkerKind::IntroStart, model::duration_to_ticks(start)),
            Marker::detected(MarkerKind::IntroEnd, model::duration_to_ticks(end)),
        ];
        self.write_and_fan_out(episode, session_id, new).await
    }

    async fn write_credits(
        &self,
        episode: &Episode,
        session_id: Option<&str>,
        remaining: Duration,
    ) -> Result<()> {
        let Some(runtime_ticks) = episode.runtime_ticks else {
            // Run length unknown; nothing to anchor the offset against.
            return Ok(());
        };
        let start_ticks = runtime_ticks - model::duration_to_ticks(remaining);
        if start_ticks <= 0 || start_ticks >= runtime_ticks {
            tracing::debug!(
                episode_id = %episode.id,
                start_ticks,
                "Skipping credits marker outside valid range"
            );
            return Ok(());
        }
        let new = vec![Marker::detected(MarkerKind::CreditsStart, start_ticks)];
        self.write_and_fan_out(episode, session_id, new).await
    }

    async fn write_and_fan_out(
        &self,
        episode: &Episode,
        session_id: Option<&str>,
        new: Vec<Marker>,
    ) -> Result<()> {
        let existing = self.store.get_markers(episode.id).await?;
        let merged = model::merge_markers(&existing, &new);
        self.store.save_markers(episode.id, merged.clone()).await?;

        tracing::info!(
            episode_id = %episode.id,
            episode = %episode.name,
            markers = new.len(),
            "Wrote detected markers"
        );

        // Fill in season siblings still lacking markers. Failures here must
        // not fail the primary write.
        if let Err(e) = self.propagator.propagate_season(episode.season_id).await {
            tracing::warn!(
                season_id = %episode.season_id,
                error = %e,
                "Sibling marker propagation failed"
            );
        }

        if self.notifications.has_targets() {
            let notifications = self.notifications.clone();
            let session_id = session_id.map(str::to_owned);
            let episode_id = episode.id;
            tokio::spawn(async move {
                notifications
                    .notify_markers_updated(session_id.as_deref(), episode_id, &merged)
                    .await;
            });
        }
        Ok(())
    }
}
