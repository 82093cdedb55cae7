//! Introsense - Intro/credits marker detection for episodic media libraries
//!
//! Two cooperating halves: a playback-telemetry state machine that turns user
//! skip behaviour into intro/credits markers, and a throttled multi-tier task
//! pipeline that schedules media probing and audio-fingerprint detection.

pub mod config;
pub mod coordinator;
pub mod logging;
pub mod model;
pub mod notifications;
pub mod pipeline;
pub mod propagate;
pub mod store;
pub mod tasks;
pub mod telemetry;
