//! End-to-end detection tests: playback telemetry through coordinated marker
//! writes and season propagation, against the in-memory library.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::settle;

use introsense::config::ConfigStore;
use introsense::coordinator::MarkerUpdateCoordinator;
use introsense::model::{self, MarkerKind, SeasonId, TICKS_PER_SECOND};
use introsense::notifications::NotificationManager;
use introsense::store::MemoryLibrary;
use introsense::telemetry::{ProgressKind, SessionInfo, TelemetryEngine};

fn session() -> SessionInfo {
    SessionInfo {
        session_id: "session-1".into(),
        user_id: "u1".into(),
        client: "web".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn skip_session_fills_markers_across_the_season() {
    let lib = MemoryLibrary::new();
    let season = SeasonId::new();
    let runtimes = [1200, 1260, 1200];
    let eps: Vec<_> = runtimes
        .iter()
        .enumerate()
        .map(|(i, rt)| {
            let ep = common::episode(season, i as i32 + 1, *rt);
            lib.add_episode(ep.clone());
            ep
        })
        .collect();

    let coordinator =
        MarkerUpdateCoordinator::new(lib.clone(), lib.clone(), NotificationManager::default());
    let engine = TelemetryEngine::new(Arc::new(ConfigStore::default()), lib.clone(), coordinator);
    let info = session();

    // Viewer starts the first episode and immediately skips the intro.
    engine.on_playback_start(&info, eps[0].clone(), Some(0));
    tokio::time::advance(Duration::from_secs(2)).await;
    engine
        .on_playback_progress(&info, ProgressKind::TimeUpdate, Some(95 * TICKS_PER_SECOND))
        .await;
    tokio::time::advance(Duration::from_secs(155)).await;
    engine
        .on_playback_progress(&info, ProgressKind::TimeUpdate, Some(250 * TICKS_PER_SECOND))
        .await;
    settle().await;

    // The intro landed on the watched episode and was copied to both
    // siblings.
    for ep in &eps {
        let markers = lib.markers_of(ep.id);
        let start = model::marker_of_kind(&markers, MarkerKind::IntroStart).unwrap();
        let end = model::marker_of_kind(&markers, MarkerKind::IntroEnd).unwrap();
        assert_eq!(start.start_ticks, 95 * TICKS_PER_SECOND);
        assert_eq!(end.start_ticks, 95 * TICKS_PER_SECOND);
    }

    // Stopping 30s before the end records a credits boundary, which is
    // re-derived per sibling against each episode's own run length.
    engine
        .on_playback_stop(&info, Some(1170 * TICKS_PER_SECOND))
        .await;
    settle().await;

    for (ep, rt) in eps.iter().zip(runtimes.iter()) {
        let markers = lib.markers_of(ep.id);
        let credits = model::marker_of_kind(&markers, MarkerKind::CreditsStart).unwrap();
        assert_eq!(credits.start_ticks, (rt - 30) * TICKS_PER_SECOND);

        // The per-item marker list stays sorted.
        let offsets: Vec<i64> = markers.iter().map(|m| m.start_ticks).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
    }
}

#[tokio::test(start_paused = true)]
async fn stop_far_from_the_end_records_nothing() {
    let lib = MemoryLibrary::new();
    let ep = common::episode(SeasonId::new(), 1, 1200);
    lib.add_episode(ep.clone());

    let coordinator =
        MarkerUpdateCoordinator::new(lib.clone(), lib.clone(), NotificationManager::default());
    let engine = TelemetryEngine::new(Arc::new(ConfigStore::default()), lib.clone(), coordinator);
    let info = session();

    // Mid-episode abandonment is not a credits signal.
    engine.on_playback_start(&info, ep.clone(), Some(0));
    engine
        .on_playback_stop(&info, Some(300 * TICKS_PER_SECOND))
        .await;
    settle().await;

    assert!(lib.markers_of(ep.id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn existing_intro_marker_short_circuits_detection() {
    let lib = MemoryLibrary::new();
    let ep = common::episode(SeasonId::new(), 1, 1200);
    lib.add_episode(ep.clone());
    lib.set_markers(
        ep.id,
        vec![
            model::Marker::detected(MarkerKind::IntroStart, 0),
            model::Marker::detected(MarkerKind::IntroEnd, 80 * TICKS_PER_SECOND),
        ],
    );

    let coordinator =
        MarkerUpdateCoordinator::new(lib.clone(), lib.clone(), NotificationManager::default());
    let engine = TelemetryEngine::new(Arc::new(ConfigStore::default()), lib.clone(), coordinator);
    let info = session();

    // A skip on an episode that already has an intro end changes nothing.
    engine.on_playback_start(&info, ep.clone(), Some(0));
    tokio::time::advance(Duration::from_secs(2)).await;
    engine
        .on_playback_progress(&info, ProgressKind::TimeUpdate, Some(95 * TICKS_PER_SECOND))
        .await;
    tokio::time::advance(Duration::from_secs(250)).await;
    engine
        .on_playback_progress(&info, ProgressKind::TimeUpdate, Some(345 * TICKS_PER_SECOND))
        .await;
    settle().await;

    let markers = lib.markers_of(ep.id);
    let end = model::marker_of_kind(&markers, MarkerKind::IntroEnd).unwrap();
    assert_eq!(end.start_ticks, 80 * TICKS_PER_SECOND);
}
