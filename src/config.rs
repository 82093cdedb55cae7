//! Configuration types for detection and pipeline scheduling.
//!
//! All structs deserialize with serde defaults so a partial config file (or an
//! empty one) yields working settings. Mutable runtime configuration lives in
//! [`ConfigStore`], whose fields sit behind [`parking_lot::RwLock`] so readers
//! never block each other and writes are short-lived. Gate capacities changed
//! through the store only affect future acquisitions (see
//! [`crate::pipeline::Gate::resize`]).

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub scope: ScopeConfig,
}

/// Thresholds seeding the per-session telemetry state machine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionConfig {
    /// Seed for the adaptive maximum intro duration, in seconds. A session's
    /// copy may grow when an early skip past a long pre-roll is observed.
    #[serde(default = "default_max_intro_secs")]
    pub max_intro_secs: u64,

    /// Window before run end inside which a stop/unpause counts as credits.
    #[serde(default = "default_max_credits_secs")]
    pub max_credits_secs: u64,

    /// Minimum opening-plot length. A first jump past this offset extends the
    /// adaptive intro window; a first-jump offset below it snaps intro start
    /// to zero.
    #[serde(default = "default_min_opening_plot_secs")]
    pub min_opening_plot_secs: u64,
}

fn default_max_intro_secs() -> u64 {
    150
}
fn default_max_credits_secs() -> u64 {
    240
}
fn default_min_opening_plot_secs() -> u64 {
    60
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_intro_secs: default_max_intro_secs(),
            max_credits_secs: default_max_credits_secs(),
            min_opening_plot_secs: default_min_opening_plot_secs(),
        }
    }
}

impl DetectionConfig {
    pub fn max_intro(&self) -> Duration {
        Duration::from_secs(self.max_intro_secs)
    }

    pub fn max_credits(&self) -> Duration {
        Duration::from_secs(self.max_credits_secs)
    }

    pub fn min_opening_plot(&self) -> Duration {
        Duration::from_secs(self.min_opening_plot_secs)
    }
}

/// Scheduling knobs for the task orchestration pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Minimum interval between queue-drain iterations, in seconds.
    #[serde(default = "default_throttle_secs")]
    pub throttle_secs: u64,

    /// Capacity of the master concurrency gate (media-info extraction,
    /// fingerprinting).
    #[serde(default = "default_master_capacity")]
    pub master_capacity: usize,

    /// Capacity of the tier-2 gate (subtitle probing, per-season
    /// fingerprint aggregation).
    #[serde(default = "default_tier2_capacity")]
    pub tier2_capacity: usize,

    /// Pause inserted after throttled remote work when the acquired gate's
    /// configured capacity is 1, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_throttle_secs() -> u64 {
    30
}
fn default_master_capacity() -> usize {
    1
}
fn default_tier2_capacity() -> usize {
    1
}
fn default_cooldown_secs() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            throttle_secs: default_throttle_secs(),
            master_capacity: default_master_capacity(),
            tier2_capacity: default_tier2_capacity(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Which playback sessions the telemetry state machine listens to.
///
/// Empty lists match everything; non-empty lists are allow-lists.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScopeConfig {
    /// Library folder prefixes eligible for detection.
    #[serde(default)]
    pub library_paths: Vec<PathBuf>,

    /// User IDs whose playback drives detection.
    #[serde(default)]
    pub user_ids: Vec<String>,

    /// Client application names whose playback drives detection.
    #[serde(default)]
    pub clients: Vec<String>,
}

impl ScopeConfig {
    /// Whether a playback session for the given episode folder, user and
    /// client falls inside the configured scope.
    pub fn matches(&self, folder_path: &std::path::Path, user_id: &str, client: &str) -> bool {
        let path_ok = self.library_paths.is_empty()
            || self.library_paths.iter().any(|p| folder_path.starts_with(p));
        let user_ok = self.user_ids.is_empty() || self.user_ids.iter().any(|u| u == user_id);
        let client_ok = self.clients.is_empty() || self.clients.iter().any(|c| c == client);
        path_ok && user_ok && client_ok
    }
}

/// Mutable runtime configuration shared across the engine and pipeline.
#[derive(Debug)]
pub struct ConfigStore {
    pub detection: RwLock<DetectionConfig>,
    pub pipeline: RwLock<PipelineConfig>,
    pub scope: RwLock<ScopeConfig>,
}

impl ConfigStore {
    pub fn new(config: &Config) -> Self {
        Self {
            detection: RwLock::new(config.detection.clone()),
            pipeline: RwLock::new(config.pipeline.clone()),
            scope: RwLock::new(config.scope.clone()),
        }
    }

    /// Read a snapshot of the detection thresholds.
    pub fn detection(&self) -> DetectionConfig {
        self.detection.read().clone()
    }

    /// Read a snapshot of the pipeline knobs.
    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.read().clone()
    }

    /// Read a snapshot of the session scope.
    pub fn scope(&self) -> ScopeConfig {
        self.scope.read().clone()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
