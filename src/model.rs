//! Core domain types: typed IDs, time ticks, episodes and chapter markers.
//!
//! Marker offsets are stored in 100ns ticks (the `runtime_ticks` convention of
//! the host library). The marker list attached to an item is always kept sorted
//! ascending by start offset with at most one marker of each kind; use
//! [`merge_markers`] to enforce that invariant when inserting.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of 100ns ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert a tick offset to a [`Duration`]. Negative offsets clamp to zero.
pub fn ticks_to_duration(ticks: i64) -> Duration {
    if ticks <= 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(ticks as u64 * 100)
    }
}

/// Convert a [`Duration`] to 100ns ticks.
pub fn duration_to_ticks(duration: Duration) -> i64 {
    (duration.as_nanos() / 100) as i64
}

/// Unique identifier for an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(Uuid);

impl EpisodeId {
    /// Generate a new random episode ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EpisodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EpisodeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeasonId(Uuid);

impl SeasonId {
    /// Generate a new random season ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SeasonId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SeasonId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for SeasonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A playable episode as seen by this crate.
///
/// Owned by the surrounding library; this crate only reads identity, ordering
/// and run length, and mutates the item's marker set through the marker store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub season_id: SeasonId,
    /// Ordinal position within the season, when known.
    pub index_number: Option<i32>,
    /// Total run length in 100ns ticks. Unknown for some items.
    pub runtime_ticks: Option<i64>,
    /// Container folder path, used for library-scope filtering.
    pub folder_path: PathBuf,
    /// Display name for logging.
    pub name: String,
}

impl Episode {
    /// Run length as a [`Duration`], if known.
    pub fn runtime(&self) -> Option<Duration> {
        self.runtime_ticks.map(ticks_to_duration)
    }
}

/// The three marker kinds this crate manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    IntroStart,
    IntroEnd,
    CreditsStart,
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerKind::IntroStart => write!(f, "intro_start"),
            MarkerKind::IntroEnd => write!(f, "intro_end"),
            MarkerKind::CreditsStart => write!(f, "credits_start"),
        }
    }
}

/// Provenance of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerOrigin {
    /// Created by the surrounding system (e.g. embedded chapters).
    External,
    /// Created by this crate's detection or propagation.
    Detected,
}

/// A named boundary attached to a playable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub kind: MarkerKind,
    /// Start offset in 100ns ticks.
    pub start_ticks: i64,
    pub origin: MarkerOrigin,
}

impl Marker {
    pub fn detected(kind: MarkerKind, start_ticks: i64) -> Self {
        Self {
            kind,
            start_ticks,
            origin: MarkerOrigin::Detected,
        }
    }

    /// Start offset as a [`Duration`].
    pub fn start(&self) -> Duration {
        ticks_to_duration(self.start_ticks)
    }
}

/// Merge new markers into an existing list, enforcing the list invariant:
/// at most one marker per kind (new markers replace old ones of the same kind)
/// and ascending order by start offset.
pub fn merge_markers(existing: &[Marker], new: &[Marker]) -> Vec<Marker> {
    let mut merged: Vec<Marker> = existing
        .iter()
        .filter(|m| !new.iter().any(|n| n.kind == m.kind))
        .copied()
        .collect();
    merged.extend_from_slice(new);
    merged.sort_by_key(|m| m.start_ticks);
    merged
}

/// Find the marker of a given kind, if present.
pub fn marker_of_kind(markers: &[Marker], kind: MarkerKind) -> Option<&Marker> {
    markers.iter().find(|m| m.kind == kind)
}
