//! Playback telemetry state machine.
//!
//! Consumes playback start/progress/stop events per session, maintains a
//! [`SessionTracker`] for each in-scope session, and emits marker update
//! requests to the [`MarkerUpdateCoordinator`] once enough evidence exists.
//! This is a best-effort heuristic engine: malformed events are silently
//! ignored and no failure here may reach the playback path.
//!
//! The jump/debounce thresholds are empirically tuned values carried over
//! unchanged; they are named constants rather than derived quantities.

mod tracker;

pub use tracker::{MarkerEmission, SessionTracker};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::ConfigStore;
use crate::coordinator::MarkerUpdateCoordinator;
use crate::model::{self, Episode, MarkerKind};
use crate::store::MarkerStore;

/// A position/time divergence above this is a jump (strictly greater).
pub(crate) const JUMP_DIVERGENCE: Duration = Duration::from_secs(5);

/// A first jump only counts when accumulated playback since start is under
/// this.
pub(crate) const IMMEDIATE_SKIP_WINDOW: Duration = Duration::from_secs(5);

/// Pause/unpause gaps under this are player noise.
pub(crate) const PAUSE_NOISE_WINDOW: Duration = Duration::from_millis(500);

/// Noise window when a rate change was seen during the session.
pub(crate) const PAUSE_NOISE_WINDOW_AFTER_RATE_CHANGE: Duration = Duration::from_millis(1500);

/// Pause/unpause gaps under this read as a manual boundary correction.
pub(crate) const MANUAL_CORRECTION_WINDOW: Duration = Duration::from_millis(5000);

/// Minimum seek magnitude for a correction when a rate change occurred.
pub(crate) const RATE_CHANGE_SEEK_MARGIN: Duration = Duration::from_millis(500);

/// How far beyond a recorded intro end a correction may still land.
pub(crate) const INTRO_END_CORRECTION_MARGIN: Duration = Duration::from_secs(30);

/// Sub-kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    TimeUpdate,
    Pause,
    Unpause,
    RateChange,
}

/// Identity of the playback session an event belongs to.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub client: String,
}

/// Converts per-session playback telemetry into marker update requests.
///
/// All session state is owned here; there are no ambient globals. Sessions
/// are created on playback start (in-scope only), mutated on progress events
/// and destroyed on stop or [`evict_idle`](Self::evict_idle).
pub struct TelemetryEngine {
    config: Arc<ConfigStore>,
    store: Arc<dyn MarkerStore>,
    coordinator: MarkerUpdateCoordinator,
    sessions: DashMap<String, SessionTracker>,
}

impl TelemetryEngine {
    pub fn new(
        config: Arc<ConfigStore>,
        store: Arc<dyn MarkerStore>,
        coordinator: MarkerUpdateCoordinator,
    ) -> Self {
        Self {
            config,
            store,
            coordinator,
            sessions: DashMap::new(),
        }
    }

    /// Number of live session trackers.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Seed a fresh tracker for an in-scope session. Out-of-scope sessions
    /// (library path, user, client) never create a tracker.
    pub fn on_playback_start(
        &self,
        info: &SessionInfo,
        episode: Episode,
        position_ticks: Option<i64>,
    ) {
        let scope = self.config.scope();
        if !scope.matches(&episode.folder_path, &info.user_id, &info.client) {
            tracing::debug!(
                session_id = %info.session_id,
                episode_id = %episode.id,
                "Ignoring out-of-scope playback session"
            );
            return;
        }

        let detection = self.config.detection();
        let start_position = model::ticks_to_duration(position_ticks.unwrap_or(0));
        let tracker = SessionTracker::new(
            episode,
            info.user_id.clone(),
            start_position,
            detection.max_intro(),
            detection.max_credits(),
            detection.min_opening_plot(),
            Instant::now(),
        );

        tracing::info!(
            session_id = %info.session_id,
            episode_id = %tracker.episode.id,
            episode = %tracker.episode.name,
            user_id = %tracker.user_id,
            "Started marker detection session"
        );
        self.sessions.insert(info.session_id.clone(), tracker);
    }

    /// Feed a progress event into the session's state machine.
    pub async fn on_playback_progress(
        &self,
        info: &SessionInfo,
        kind: ProgressKind,
        position_ticks: Option<i64>,
    ) {
        let now = Instant::now();
        match kind {
            ProgressKind::Pause => {
                if let Some(mut tracker) = self.sessions.get_mut(&info.session_id) {
                    tracker.on_pause(now);
                }
            }
            ProgressKind::RateChange => {
                if let Some(mut tracker) = self.sessions.get_mut(&info.session_id) {
                    tracker.on_rate_change(now);
                }
            }
            ProgressKind::TimeUpdate => {
                let Some(position_ticks) = position_ticks else {
                    return;
                };
                let Some(episode_id) = self
                    .sessions
                    .get(&info.session_id)
                    .map(|t| t.episode.id)
                else {
                    return;
                };

                // Markers are read before taking the tracker entry so the
                // map guard is never held across an await.
                let markers = self.store.get_markers(episode_id).await.unwrap_or_else(|e| {
                    tracing::debug!(episode_id = %episode_id, error = %e, "Marker lookup failed");
                    Vec::new()
                });
                let has_intro_end =
                    model::marker_of_kind(&markers, MarkerKind::IntroEnd).is_some();

                let emission = self.sessions.get_mut(&info.session_id).and_then(|mut t| {
                    t.on_time_update(
                        model::ticks_to_duration(position_ticks),
                        has_intro_end,
                        now,
                    )
                });
                if let Some(emission) = emission {
                    self.dispatch(info, emission);
                }
            }
            ProgressKind::Unpause => {
                let Some(position_ticks) = position_ticks else {
                    return;
                };
                let Some(episode_id) = self
                    .sessions
                    .get(&info.session_id)
                    .map(|t| t.episode.id)
                else {
                    return;
                };

                let markers = self.store.get_markers(episode_id).await.unwrap_or_else(|e| {
                    tracing::debug!(episode_id = %episode_id, error = %e, "Marker lookup failed");
                    Vec::new()
                });
                let intro_start = model::marker_of_kind(&markers, MarkerKind::IntroStart)
                    .map(|m| m.start());
                let intro_end =
                    model::marker_of_kind(&markers, MarkerKind::IntroEnd).map(|m| m.start());
                let has_credits =
                    model::marker_of_kind(&markers, MarkerKind::CreditsStart).is_some();

                let emissions = self
                    .sessions
                    .get_mut(&info.session_id)
                    .map(|mut t| {
                        t.on_unpause(
                            model::ticks_to_duration(position_ticks),
                            intro_start,
                            intro_end,
                            has_credits,
                            now,
                        )
                    })
                    .unwrap_or_default();
                for emission in emissions {
                    self.dispatch(info, emission);
                }
            }
        }
    }

    /// Tear down the session; a stop inside the credits window emits a
    /// credits boundary first.
    pub async fn on_playback_stop(&self, info: &SessionInfo, position_ticks: Option<i64>) {
        let Some((_, tracker)) = self.sessions.remove(&info.session_id) else {
            return;
        };

        if let Some(position_ticks) = position_ticks {
            let markers = self
                .store
                .get_markers(tracker.episode.id)
                .await
                .unwrap_or_default();
            let has_credits =
                model::marker_of_kind(&markers, MarkerKind::CreditsStart).is_some();
            if let Some(emission) =
                tracker.on_stop(model::ticks_to_duration(position_ticks), has_credits)
            {
                self.dispatch_for(&tracker.episode, info, emission);
            }
        }

        tracing::debug!(
            session_id = %info.session_id,
            "Discarded marker detection session"
        );
    }

    /// Drop trackers idle for longer than `max_idle`. Returns the number
    /// evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, t| t.idle_for(now) <= max_idle);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle detection sessions");
        }
        evicted
    }

    fn dispatch(&self, info: &SessionInfo, emission: MarkerEmission) {
        let Some(episode) = self
            .sessions
            .get(&info.session_id)
            .map(|t| t.episode.clone())
        else {
            return;
        };
        self.dispatch_for(&episode, info, emission);
    }

    fn dispatch_for(&self, episode: &Episode, info: &SessionInfo, emission: MarkerEmission) {
        match emission {
            MarkerEmission::Intro { start, end } => {
                self.coordinator.submit_intro(
                    episode.clone(),
                    Some(info.session_id.clone()),
                    start,
                    end,
                );
            }
            MarkerEmission::Credits { remaining } => {
                self.coordinator.submit_credits(
                    episode.clone(),
                    Some(info.session_id.clone()),
                    remaining,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ScopeConfig};
    use crate::model::{EpisodeId, SeasonId, TICKS_PER_SECOND};
    use crate::notifications::NotificationManager;
    use crate::store::MemoryLibrary;
    use std::path::PathBuf;

    fn episode(lib: &MemoryLibrary, runtime_secs: i64) -> Episode {
        let ep = Episode {
            id: EpisodeId::new(),
            season_id: SeasonId::new(),
            index_number: Some(1),
            runtime_ticks: Some(runtime_secs * TICKS_PER_SECOND),
            folder_path: PathBuf::from("/media/tv/show/s01"),
            name: "S01E01".into(),
        };
        lib.add_episode(ep.clone());
        ep
    }

    fn engine(lib: &Arc<MemoryLibrary>, scope: ScopeConfig) -> TelemetryEngine {
        let mut config = Config::default();
        config.scope = scope;
        let config = Arc::new(ConfigStore::new(&config));
        let coordinator = MarkerUpdateCoordinator::new(
            lib.clone(),
            lib.clone(),
            NotificationManager::default(),
        );
        TelemetryEngine::new(config, lib.clone(), coordinator)
    }

    fn info() -> SessionInfo {
        SessionInfo {
            session_id: "session-1".into(),
            user_id: "u1".into(),
            client: "web".into(),
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_scope_session_creates_no_tracker() {
        let lib = MemoryLibrary::new();
        let ep = episode(&lib, 1200);
        let engine = engine(
            &lib,
            ScopeConfig {
                library_paths: vec![PathBuf::from("/media/anime")],
                user_ids: vec![],
                clients: vec![],
            },
        );

        engine.on_playback_start(&info(), ep, Some(0));
        assert_eq!(engine.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_driven_session_writes_intro_markers() {
        let lib = MemoryLibrary::new();
        let ep = episode(&lib, 1200);
        let engine = engine(&lib, ScopeConfig::default());
        let info = info();

        engine.on_playback_start(&info, ep.clone(), Some(0));
        assert_eq!(engine.active_sessions(), 1);

        // Viewer immediately skips to 95s, then playback runs past the
        // detection window.
        tokio::time::advance(Duration::from_secs(2)).await;
        engine
            .on_playback_progress(&info, ProgressKind::TimeUpdate, Some(95 * TICKS_PER_SECOND))
            .await;
        // Window extended to 150 + 95 = 245s; crossing it emits the intro.
        tokio::time::advance(Duration::from_secs(155)).await;
        engine
            .on_playback_progress(
                &info,
                ProgressKind::TimeUpdate,
                Some(250 * TICKS_PER_SECOND),
            )
            .await;
        settle().await;

        let markers = lib.markers_of(ep.id);
        let start = model::marker_of_kind(&markers, MarkerKind::IntroStart).unwrap();
        let end = model::marker_of_kind(&markers, MarkerKind::IntroEnd).unwrap();
        assert_eq!(start.start_ticks, 95 * TICKS_PER_SECOND);
        assert_eq!(end.start_ticks, 95 * TICKS_PER_SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_near_end_writes_credits_marker() {
        let lib = MemoryLibrary::new();
        let ep = episode(&lib, 1200);
        let engine = engine(&lib, ScopeConfig::default());
        let info = info();

        engine.on_playback_start(&info, ep.clone(), Some(0));
        engine
            .on_playback_stop(&info, Some(1170 * TICKS_PER_SECOND))
            .await;
        settle().await;

        let markers = lib.markers_of(ep.id);
        let credits = model::marker_of_kind(&markers, MarkerKind::CreditsStart).unwrap();
        assert_eq!(credits.start_ticks, 1170 * TICKS_PER_SECOND);
        assert_eq!(engine.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_position_is_ignored() {
        let lib = MemoryLibrary::new();
        let ep = episode(&lib, 1200);
        let engine = engine(&lib, ScopeConfig::default());
        let info = info();

        engine.on_playback_start(&info, ep.clone(), Some(0));
        engine
            .on_playback_progress(&info, ProgressKind::TimeUpdate, None)
            .await;
        engine.on_playback_stop(&info, None).await;
        settle().await;

        assert!(lib.markers_of(ep.id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted() {
        let lib = MemoryLibrary::new();
        let ep = episode(&lib, 1200);
        let engine = engine(&lib, ScopeConfig::default());

        engine.on_playback_start(&info(), ep, Some(0));
        tokio::time::advance(Duration::from_secs(3600)).await;
        let evicted = engine.evict_idle(Duration::from_secs(1800));
        assert_eq!(evicted, 1);
        assert_eq!(engine.active_sessions(), 0);
    }
}
