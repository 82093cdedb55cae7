//! Shared fixtures for integration tests: an in-memory library plus scripted
//! pipeline collaborators that record the instant of every call.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use introsense::model::{Episode, EpisodeId, SeasonId, TICKS_PER_SECOND};
use introsense::pipeline::Collaborators;
use introsense::store::MemoryLibrary;
use introsense::tasks::{
    Fingerprinter, MarkerCandidate, MediaInfoExtractor, SeasonAggregator, SubtitleProber,
    TaskOutcome,
};

pub fn episode(season: SeasonId, index: i32, runtime_secs: i64) -> Episode {
    Episode {
        id: EpisodeId::new(),
        season_id: season,
        index_number: Some(index),
        runtime_ticks: Some(runtime_secs * TICKS_PER_SECOND),
        folder_path: PathBuf::from("/media/tv/show/s01"),
        name: format!("S01E{index:02}"),
    }
}

/// Let spawned pipeline tasks run to completion without advancing the clock.
pub async fn settle() {
    for _ in 0..1000 {
        tokio::task::yield_now().await;
    }
}

/// Media-info extractor stub. Records call instants; outcome is scripted.
pub struct RecordingExtractor {
    pub calls: Mutex<Vec<(EpisodeId, Instant)>>,
    pub throttled: bool,
    pub extracted: bool,
    pub qualifies: bool,
}

impl RecordingExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            throttled: false,
            extracted: true,
            qualifies: false,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl MediaInfoExtractor for RecordingExtractor {
    async fn extract(
        &self,
        episode: &Episode,
        _token: &CancellationToken,
    ) -> anyhow::Result<TaskOutcome> {
        self.calls.lock().push((episode.id, Instant::now()));
        Ok(TaskOutcome::Completed {
            throttled_remote_work: self.throttled,
        })
    }

    fn is_extracted(&self, _episode: &Episode) -> bool {
        self.extracted
    }

    fn qualifies_for_detection(&self, _episode: &Episode) -> bool {
        self.qualifies
    }
}

/// Subtitle prober stub.
pub struct RecordingProber {
    pub calls: Mutex<Vec<(EpisodeId, Instant)>>,
    pub throttled: bool,
}

impl RecordingProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            throttled: false,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SubtitleProber for RecordingProber {
    async fn probe(
        &self,
        episode: &Episode,
        _token: &CancellationToken,
    ) -> anyhow::Result<TaskOutcome> {
        self.calls.lock().push((episode.id, Instant::now()));
        Ok(TaskOutcome::Completed {
            throttled_remote_work: self.throttled,
        })
    }
}

/// Fingerprinter stub; episodes in `skip_ids` report themselves not yet
/// fingerprintable.
pub struct RecordingFingerprinter {
    pub calls: Mutex<Vec<(EpisodeId, Instant)>>,
    pub skip_ids: Mutex<HashSet<EpisodeId>>,
    pub throttled: bool,
}

impl RecordingFingerprinter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            skip_ids: Mutex::new(HashSet::new()),
            throttled: false,
        })
    }

    pub fn skip(&self, episode: EpisodeId) {
        self.skip_ids.lock().insert(episode);
    }
}

#[async_trait]
impl Fingerprinter for RecordingFingerprinter {
    async fn fingerprint(
        &self,
        episode: &Episode,
        _token: &CancellationToken,
    ) -> anyhow::Result<TaskOutcome> {
        self.calls.lock().push((episode.id, Instant::now()));
        if self.skip_ids.lock().contains(&episode.id) {
            return Ok(TaskOutcome::Skipped);
        }
        Ok(TaskOutcome::Completed {
            throttled_remote_work: self.throttled,
        })
    }
}

/// Aggregator stub: records aggregated seasons and yields one intro candidate
/// per episode with a fixed intro end offset.
pub struct RecordingAggregator {
    pub seasons: Mutex<Vec<SeasonId>>,
    pub intro_end_secs: i64,
}

impl RecordingAggregator {
    pub fn new(intro_end_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            seasons: Mutex::new(Vec::new()),
            intro_end_secs,
        })
    }

    pub fn aggregated_seasons(&self) -> Vec<SeasonId> {
        self.seasons.lock().clone()
    }
}

#[async_trait]
impl SeasonAggregator for RecordingAggregator {
    async fn aggregate(
        &self,
        season: SeasonId,
        episodes: &[Episode],
        _token: &CancellationToken,
    ) -> anyhow::Result<Vec<MarkerCandidate>> {
        self.seasons.lock().push(season);
        Ok(episodes
            .iter()
            .map(|e| MarkerCandidate {
                episode: e.id,
                intro_start_ticks: 0,
                intro_end_ticks: self.intro_end_secs * TICKS_PER_SECOND,
            })
            .collect())
    }
}

/// All-stub collaborator set over a [`MemoryLibrary`].
pub struct StubSet {
    pub lib: Arc<MemoryLibrary>,
    pub extractor: Arc<RecordingExtractor>,
    pub prober: Arc<RecordingProber>,
    pub fingerprinter: Arc<RecordingFingerprinter>,
    pub aggregator: Arc<RecordingAggregator>,
}

impl StubSet {
    pub fn new() -> Self {
        Self {
            lib: MemoryLibrary::new(),
            extractor: RecordingExtractor::new(),
            prober: RecordingProber::new(),
            fingerprinter: RecordingFingerprinter::new(),
            aggregator: RecordingAggregator::new(90),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.lib.clone(),
            library: self.lib.clone(),
            extractor: self.extractor.clone(),
            subtitles: self.prober.clone(),
            fingerprinter: self.fingerprinter.clone(),
            aggregator: self.aggregator.clone(),
        }
    }
}
