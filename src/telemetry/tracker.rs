//! Per-session mutable state and the transition logic that turns playback
//! telemetry into marker boundary emissions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::model::Episode;

use super::{
    IMMEDIATE_SKIP_WINDOW, INTRO_END_CORRECTION_MARGIN, JUMP_DIVERGENCE, MANUAL_CORRECTION_WINDOW,
    PAUSE_NOISE_WINDOW, PAUSE_NOISE_WINDOW_AFTER_RATE_CHANGE, RATE_CHANGE_SEEK_MARGIN,
};

/// A boundary update the state machine wants written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerEmission {
    /// Replace the intro markers with the given start/end offsets.
    Intro { start: Duration, end: Duration },
    /// Replace the credits marker; `remaining` is run length minus the
    /// observed position (the new credits duration).
    Credits { remaining: Duration },
}

/// Mutable state for one playback session.
///
/// Created on playback start, mutated on every progress/stop event, destroyed
/// on stop or idle eviction.
#[derive(Debug)]
pub struct SessionTracker {
    pub episode: Episode,
    /// Originating user, kept for logging.
    pub user_id: String,
    pub started_at: DateTime<Utc>,

    /// Position at playback start.
    playback_start: Duration,
    prev_position: Duration,
    prev_event_at: Instant,

    /// Destination of the first qualifying forward jump.
    first_jump: Option<Duration>,
    /// Destination of the most recent jump.
    last_jump: Option<Duration>,

    /// Adaptive detection window; grows when an early skip past a long
    /// pre-roll is observed.
    max_intro: Duration,
    max_credits: Duration,
    min_opening_plot: Duration,

    last_pause_at: Option<Instant>,
    last_rate_change_at: Option<Instant>,
    last_event_at: Instant,
}

impl SessionTracker {
    pub fn new(
        episode: Episode,
        user_id: String,
        start_position: Duration,
        max_intro: Duration,
        max_credits: Duration,
        min_opening_plot: Duration,
        now: Instant,
    ) -> Self {
        Self {
            episode,
            user_id,
            started_at: Utc::now(),
            playback_start: start_position,
            prev_position: start_position,
            prev_event_at: now,
            first_jump: None,
            last_jump: None,
            max_intro,
            max_credits,
            min_opening_plot,
            last_pause_at: None,
            last_rate_change_at: None,
            last_event_at: now,
        }
    }

    /// Age since the last event, for idle eviction.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_event_at)
    }

    /// Current adaptive detection window.
    pub fn max_intro(&self) -> Duration {
        self.max_intro
    }

    /// Handle a position report. `has_intro_end` short-circuits intro
    /// detection once a boundary already exists.
    pub fn on_time_update(
        &mut self,
        position: Duration,
        has_intro_end: bool,
        now: Instant,
    ) -> Option<MarkerEmission> {
        self.last_event_at = now;

        if has_intro_end {
            self.prev_position = position;
            self.prev_event_at = now;
            return None;
        }

        let elapsed = now.saturating_duration_since(self.prev_event_at);
        let delta_nanos = position.as_nanos() as i128 - self.prev_position.as_nanos() as i128;
        let divergence = delta_nanos.unsigned_abs() as i128 - elapsed.as_nanos() as i128;

        let is_jump = divergence > JUMP_DIVERGENCE.as_nanos() as i128 && position < self.max_intro;

        if is_jump {
            let forward = delta_nanos > 0;
            tracing::debug!(
                episode_id = %self.episode.id,
                position_secs = position.as_secs_f64(),
                forward,
                "Detected playback jump"
            );

            let accumulated = self.prev_position.saturating_sub(self.playback_start);
            if forward && self.first_jump.is_none() && accumulated < IMMEDIATE_SKIP_WINDOW {
                self.first_jump = Some(position);
                if position > self.min_opening_plot {
                    // A deliberate early skip past a long pre-roll pushes the
                    // detection window out by the skip destination.
                    self.max_intro += position;
                    tracing::debug!(
                        episode_id = %self.episode.id,
                        max_intro_secs = self.max_intro.as_secs_f64(),
                        "Extended adaptive intro window"
                    );
                }
            }
            self.last_jump = Some(position);
        }

        let emission = if position >= self.max_intro {
            self.last_jump.map(|last| {
                let start = match self.first_jump {
                    Some(first) if first > self.min_opening_plot => first,
                    _ => Duration::ZERO,
                };
                MarkerEmission::Intro { start, end: last }
            })
        } else {
            None
        };

        self.prev_position = position;
        self.prev_event_at = now;
        emission
    }

    pub fn on_pause(&mut self, now: Instant) {
        self.last_pause_at = Some(now);
        self.last_event_at = now;
    }

    pub fn on_rate_change(&mut self, now: Instant) {
        self.last_rate_change_at = Some(now);
        self.last_event_at = now;
    }

    /// Handle an unpause. May emit a manual intro-end correction and/or a
    /// credits correction; trivial pause/unpause pairs are debounced as
    /// player noise.
    pub fn on_unpause(
        &mut self,
        position: Duration,
        intro_start: Option<Duration>,
        intro_end: Option<Duration>,
        has_credits: bool,
        now: Instant,
    ) -> Vec<MarkerEmission> {
        self.last_event_at = now;

        let Some(pause_at) = self.last_pause_at.take() else {
            return Vec::new();
        };
        let gap = now.saturating_duration_since(pause_at);
        let rate_changed = self.last_rate_change_at.is_some();

        let noise_window = if rate_changed {
            PAUSE_NOISE_WINDOW_AFTER_RATE_CHANGE
        } else {
            PAUSE_NOISE_WINDOW
        };
        if gap < noise_window {
            return Vec::new();
        }
        if gap >= MANUAL_CORRECTION_WINDOW {
            return Vec::new();
        }

        let mut emissions = Vec::new();

        // A quick pause/unpause just past a wrong intro-end boundary reads as
        // the viewer correcting it by hand.
        if let Some(start) = intro_start {
            let upper = intro_end
                .map(|end| end + INTRO_END_CORRECTION_MARGIN)
                .unwrap_or(self.max_intro)
                .max(self.max_intro);
            let magnitude_nanos =
                (position.as_nanos() as i128 - self.prev_position.as_nanos() as i128).unsigned_abs();
            let magnitude_ok = if rate_changed {
                magnitude_nanos > RATE_CHANGE_SEEK_MARGIN.as_nanos()
            } else {
                true
            };
            if position > start && position < upper && magnitude_ok {
                emissions.push(MarkerEmission::Intro {
                    start,
                    end: position,
                });
            }
        }

        if has_credits {
            if let Some(runtime) = self.episode.runtime() {
                if position + self.max_credits >= runtime && position < runtime {
                    emissions.push(MarkerEmission::Credits {
                        remaining: runtime - position,
                    });
                }
            }
        }

        self.prev_position = position;
        self.prev_event_at = now;
        emissions
    }

    /// Handle playback stop. Emits a credits boundary when the viewer bailed
    /// inside the credits window and no marker exists yet.
    pub fn on_stop(&self, position: Duration, has_credits: bool) -> Option<MarkerEmission> {
        if has_credits {
            return None;
        }
        let runtime = self.episode.runtime()?;
        if position + self.max_credits >= runtime && position < runtime {
            Some(MarkerEmission::Credits {
                remaining: runtime - position,
            })
        } else {
            None
        }
    }
}
