//! Marker-update notification fan-out.
//!
//! Targets are informed after a successful marker write. Notification is
//! fire-and-forget: errors are logged but never propagated, and no response is
//! consumed.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{EpisodeId, Marker};

/// A single notification target.
#[async_trait]
pub trait MarkerNotifier: Send + Sync {
    fn name(&self) -> &str;

    /// Called after markers were written for an episode. `session_id` is the
    /// originating playback session when the write came from telemetry.
    async fn markers_updated(
        &self,
        session_id: Option<&str>,
        episode: EpisodeId,
        markers: &[Marker],
    ) -> Result<()>;
}

/// Manages all notification targets.
#[derive(Default, Clone)]
pub struct NotificationManager {
    targets: Vec<Arc<dyn MarkerNotifier>>,
}

impl NotificationManager {
    pub fn new(targets: Vec<Arc<dyn MarkerNotifier>>) -> Self {
        Self { targets }
    }

    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Notify all targets about a marker write. Errors are logged but not
    /// propagated.
    pub async fn notify_markers_updated(
        &self,
        session_id: Option<&str>,
        episode: EpisodeId,
        markers: &[Marker],
    ) {
        for target in &self.targets {
            if let Err(e) = target.markers_updated(session_id, episode, markers).await {
                tracing::warn!(
                    target = target.name(),
                    episode_id = %episode,
                    error = %e,
                    "Failed to notify marker update target"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarkerKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MarkerNotifier for CountingNotifier {
        fn name(&self) -> &str {
            "counting"
        }

        async fn markers_updated(
            &self,
            _session_id: Option<&str>,
            _episode: EpisodeId,
            _markers: &[Marker],
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("target unreachable");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_fanout() {
        let failing = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let ok = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let manager = NotificationManager::new(vec![failing.clone(), ok.clone()]);

        manager
            .notify_markers_updated(
                Some("session-1"),
                EpisodeId::new(),
                &[Marker::detected(MarkerKind::IntroStart, 0)],
            )
            .await;

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }
}
