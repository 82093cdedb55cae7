//! Task orchestration pipeline.
//!
//! Owns the four item queues (media-info, subtitle, fingerprint,
//! marker-populate) and the two concurrency gates, drains the queues on a
//! fixed interval, fans work out to the worker pool and enforces the
//! per-season two-phase fingerprint dependency. A single item's failure is
//! logged and never aborts its batch; cancellation is cooperative and
//! observed at every suspension point.

pub mod gate;
pub mod queue;

pub use gate::{Gate, GatePermit};
pub use queue::{ItemQueue, QueueKind, WorkItem};

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::model::{self, Episode, Marker, MarkerKind, SeasonId};
use crate::propagate::SeasonPropagator;
use crate::store::{LibraryQuery, MarkerStore};
use crate::tasks::{
    Fingerprinter, MediaInfoExtractor, SeasonAggregator, SubtitleProber, TaskOutcome,
};

/// Error returned when enqueueing into a pipeline that is shutting down.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is shutting down")]
    ShuttingDown,
}

/// Caller-supplied batch resolver: turns a drained batch into the ordered
/// work list (eligibility filtering, blacklist checks). Defaults to identity.
pub type BatchFilter = Arc<dyn Fn(Vec<Episode>) -> Vec<Episode> + Send + Sync>;

fn identity_filter() -> BatchFilter {
    Arc::new(|batch: Vec<Episode>| batch)
}

/// Per-queue batch resolvers.
#[derive(Clone)]
pub struct BatchFilters {
    pub media_info: BatchFilter,
    pub subtitle: BatchFilter,
    pub fingerprint: BatchFilter,
    pub marker_populate: BatchFilter,
}

impl Default for BatchFilters {
    fn default() -> Self {
        Self {
            media_info: identity_filter(),
            subtitle: identity_filter(),
            fingerprint: identity_filter(),
            marker_populate: identity_filter(),
        }
    }
}

/// The external collaborators the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn MarkerStore>,
    pub library: Arc<dyn LibraryQuery>,
    pub extractor: Arc<dyn MediaInfoExtractor>,
    pub subtitles: Arc<dyn SubtitleProber>,
    pub fingerprinter: Arc<dyn Fingerprinter>,
    pub aggregator: Arc<dyn SeasonAggregator>,
}

/// Snapshot of queue depths for observability logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepths {
    pub media_info: usize,
    pub subtitle: usize,
    pub fingerprint: usize,
    pub marker_populate: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.media_info + self.subtitle + self.fingerprint + self.marker_populate
    }
}

/// Multi-tier concurrent task orchestration over the analysis collaborators.
///
/// All queues, gates and the cancellation token are owned here; workers
/// receive the pipeline by `Arc` rather than touching ambient globals. Create
/// with [`TaskPipeline::new`], launch with [`start`](Self::start), stop with
/// [`shutdown`](Self::shutdown).
pub struct TaskPipeline {
    config: Arc<ConfigStore>,
    collaborators: Collaborators,
    filters: BatchFilters,
    propagator: SeasonPropagator,

    media_info_queue: ItemQueue,
    subtitle_queue: ItemQueue,
    fingerprint_queue: ItemQueue,
    marker_populate_queue: ItemQueue,

    master_gate: Gate,
    tier2_gate: Gate,

    cancel: CancellationToken,
}

impl TaskPipeline {
    pub fn new(
        config: Arc<ConfigStore>,
        collaborators: Collaborators,
        filters: BatchFilters,
    ) -> Arc<Self> {
        let pipeline_config = config.pipeline();
        Arc::new(Self {
            propagator: SeasonPropagator::new(
                collaborators.store.clone(),
                collaborators.library.clone(),
            ),
            config,
            collaborators,
            filters,
            media_info_queue: ItemQueue::new(QueueKind::MediaInfo),
            subtitle_queue: ItemQueue::new(QueueKind::Subtitle),
            fingerprint_queue: ItemQueue::new(QueueKind::Fingerprint),
            marker_populate_queue: ItemQueue::new(QueueKind::MarkerPopulate),
            master_gate: Gate::new("master", pipeline_config.master_capacity),
            tier2_gate: Gate::new("tier2", pipeline_config.tier2_capacity),
            cancel: CancellationToken::new(),
        })
    }

    /// The master gate (media-info extraction, fingerprinting). Exposed for
    /// live capacity changes.
    pub fn master_gate(&self) -> &Gate {
        &self.master_gate
    }

    /// The tier-2 gate (subtitle probing, season aggregation).
    pub fn tier2_gate(&self) -> &Gate {
        &self.tier2_gate
    }

    /// Re-read gate capacities from the config store and swap the gates.
    /// In-flight holders are unaffected.
    pub fn apply_gate_capacities(&self) {
        let pipeline_config = self.config.pipeline();
        self.master_gate.resize(pipeline_config.master_capacity);
        self.tier2_gate.resize(pipeline_config.tier2_capacity);
    }

    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            media_info: self.media_info_queue.len(),
            subtitle: self.subtitle_queue.len(),
            fingerprint: self.fingerprint_queue.len(),
            marker_populate: self.marker_populate_queue.len(),
        }
    }

    pub fn enqueue_media_info(&self, episode: Episode) -> Result<(), PipelineError> {
        self.enqueue(&self.media_info_queue, episode)
    }

    pub fn enqueue_subtitles(&self, episode: Episode) -> Result<(), PipelineError> {
        self.enqueue(&self.subtitle_queue, episode)
    }

    pub fn enqueue_fingerprint(&self, episode: Episode) -> Result<(), PipelineError> {
        self.enqueue(&self.fingerprint_queue, episode)
    }

    pub fn enqueue_marker_populate(&self, episode: Episode) -> Result<(), PipelineError> {
        self.enqueue(&self.marker_populate_queue, episode)
    }

    fn enqueue(&self, queue: &ItemQueue, episode: Episode) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::ShuttingDown);
        }
        queue.push(episode);
        Ok(())
    }

    /// Spawn the queue loops. The returned handle resolves once all loops
    /// have observed shutdown and drained their outstanding work.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Request cooperative shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run all queue loops until cancellation.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("Task pipeline started");
        let probe = {
            let this = self.clone();
            tokio::spawn(async move { this.probe_loop().await })
        };
        let fingerprint = {
            let this = self.clone();
            tokio::spawn(async move { this.fingerprint_loop().await })
        };
        let populate = {
            let this = self.clone();
            tokio::spawn(async move { this.populate_loop().await })
        };
        for (name, handle) in [
            ("probe", probe),
            ("fingerprint", fingerprint),
            ("populate", populate),
        ] {
            if let Err(e) = handle.await {
                tracing::error!(loop_name = name, error = %e, "Pipeline loop panicked");
            }
        }
        tracing::info!("Task pipeline terminated");
    }

    /// Sleep out the remainder of the throttle interval since the previous
    /// iteration started. Returns false when cancelled during the wait.
    async fn throttle(&self, last_run: Option<Instant>) -> bool {
        if let Some(last) = last_run {
            let next = last + self.config.pipeline().throttle_interval();
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(next) => {}
            }
        }
        !self.cancel.is_cancelled()
    }

    fn log_loop_exit(&self, name: &'static str, pending: usize) {
        if pending == 0 {
            tracing::info!(loop_name = name, "Pipeline loop stopped; queues empty");
        } else {
            tracing::info!(
                loop_name = name,
                pending,
                "Pipeline loop cancelled with pending items"
            );
        }
    }

    // ------------------------------------------------------------------
    // Media-info / subtitle family
    // ------------------------------------------------------------------

    async fn probe_loop(self: Arc<Self>) {
        let mut last_run: Option<Instant> = None;
        loop {
            if !self.throttle(last_run).await {
                break;
            }
            // Recorded every iteration, found work or not, so the throttle
            // stays accurate across empty cycles.
            last_run = Some(Instant::now());

            let work = self.build_probe_work();
            if work.is_empty() {
                continue;
            }
            tracing::debug!(items = work.len(), "Dispatching probe work");
            self.clone().dispatch(work).await;
        }
        self.log_loop_exit(
            "probe",
            self.media_info_queue.len() + self.subtitle_queue.len(),
        );
    }

    /// Drain the media-info and subtitle queues into a shared work list.
    fn build_probe_work(&self) -> Vec<WorkItem> {
        let mut work = Vec::new();

        let batch = (self.filters.media_info)(self.media_info_queue.drain_dedup());
        for episode in batch {
            let extractor = self.collaborators.extractor.clone();
            let token = self.cancel.clone();
            let ep = episode.clone();
            work.push(WorkItem {
                source: QueueKind::MediaInfo,
                episode,
                action: Box::pin(async move { extractor.extract(&ep, &token).await }),
            });
        }

        let batch = (self.filters.subtitle)(self.subtitle_queue.drain_dedup());
        for episode in batch {
            let subtitles = self.collaborators.subtitles.clone();
            let token = self.cancel.clone();
            let ep = episode.clone();
            work.push(WorkItem {
                source: QueueKind::Subtitle,
                episode,
                action: Box::pin(async move { subtitles.probe(&ep, &token).await }),
            });
        }

        work
    }

    /// Dispatch work items across the worker pool, one gate slot each, and
    /// await the whole batch.
    async fn dispatch(self: Arc<Self>, work: Vec<WorkItem>) {
        let mut handles = Vec::with_capacity(work.len());
        for item in work {
            if self.cancel.is_cancelled() {
                break;
            }
            let gate = match item.source {
                QueueKind::Subtitle => &self.tier2_gate,
                _ => &self.master_gate,
            };
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = gate.acquire() => permit,
            };

            let this = self.clone();
            handles.push(tokio::spawn(async move {
                this.run_work_item(item, permit).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Work item task panicked");
            }
        }
    }

    /// Run one work item while holding its gate permit. Failure is isolated
    /// to the item; the permit is held through the cooldown so a
    /// single-worker gate paces its remote calls.
    async fn run_work_item(&self, item: WorkItem, permit: GatePermit) {
        let WorkItem {
            source,
            episode,
            action,
        } = item;

        let outcome = match action.await {
            Ok(outcome) => outcome,
            Err(e) => {
                if self.cancel.is_cancelled() {
                    tracing::debug!(
                        episode_id = %episode.id,
                        source = %source,
                        "Work item cancelled"
                    );
                } else {
                    tracing::warn!(
                        episode_id = %episode.id,
                        source = %source,
                        error = %e,
                        "Work item failed"
                    );
                }
                return;
            }
        };

        match outcome {
            TaskOutcome::Skipped => {
                tracing::debug!(
                    episode_id = %episode.id,
                    source = %source,
                    "Work item not yet eligible; skipped"
                );
            }
            TaskOutcome::Completed {
                throttled_remote_work,
            } => {
                if source == QueueKind::MediaInfo
                    && self.collaborators.extractor.qualifies_for_detection(&episode)
                {
                    // Freshly probed episodes flow on to fingerprinting.
                    self.fingerprint_queue.push(episode.clone());
                }
                if throttled_remote_work && permit.capacity() == 1 {
                    let cooldown = self.config.pipeline().cooldown();
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = tokio::time::sleep(cooldown) => {}
                    }
                }
            }
        }
        drop(permit);
    }

    // ------------------------------------------------------------------
    // Fingerprint family (two-phase per season)
    // ------------------------------------------------------------------

    async fn fingerprint_loop(self: Arc<Self>) {
        let mut last_run: Option<Instant> = None;
        loop {
            if !self.throttle(last_run).await {
                break;
            }
            last_run = Some(Instant::now());

            let batch = (self.filters.fingerprint)(self.fingerprint_queue.drain_dedup());
            if batch.is_empty() {
                continue;
            }

            let mut seasons: HashMap<SeasonId, Vec<Episode>> = HashMap::new();
            for episode in batch {
                seasons.entry(episode.season_id).or_default().push(episode);
            }
            tracing::debug!(seasons = seasons.len(), "Dispatching fingerprint work");

            // Seasons are independent; the iteration completes only after
            // every season task has joined.
            let mut handles = Vec::with_capacity(seasons.len());
            for (season, episodes) in seasons {
                let this = self.clone();
                handles.push(tokio::spawn(async move {
                    this.process_season(season, episodes).await;
                }));
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Season task panicked");
                }
            }
        }
        self.log_loop_exit("fingerprint", self.fingerprint_queue.len());
    }

    /// Phase 1 fingerprints every episode of a season under the master gate;
    /// phase 2 aggregates the season under the tier-2 gate unless any episode
    /// signalled skip or shutdown was requested.
    async fn process_season(&self, season: SeasonId, episodes: Vec<Episode>) {
        let mut season_skipped = false;

        for episode in &episodes {
            if self.cancel.is_cancelled() {
                return;
            }
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return,
                permit = self.master_gate.acquire() => permit,
            };

            match self.fingerprint_episode(episode).await {
                Ok(TaskOutcome::Skipped) => {
                    // Not yet extractable; suppress phase 2 for the season.
                    season_skipped = true;
                    tracing::debug!(
                        episode_id = %episode.id,
                        season_id = %season,
                        "Episode not fingerprintable yet; season aggregation deferred"
                    );
                }
                Ok(outcome) => {
                    if outcome.throttled_remote_work() && permit.capacity() == 1 {
                        let cooldown = self.config.pipeline().cooldown();
                        tokio::select! {
                            _ = self.cancel.cancelled() => {}
                            _ = tokio::time::sleep(cooldown) => {}
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        episode_id = %episode.id,
                        season_id = %season,
                        error = %e,
                        "Episode fingerprinting failed"
                    );
                }
            }
            drop(permit);
        }

        if season_skipped || self.cancel.is_cancelled() {
            return;
        }

        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return,
            permit = self.tier2_gate.acquire() => permit,
        };
        match self
            .collaborators
            .aggregator
            .aggregate(season, &episodes, &self.cancel)
            .await
        {
            Ok(candidates) => {
                let found = candidates.len();
                if let Err(e) = self.persist_candidates(candidates).await {
                    tracing::warn!(season_id = %season, error = %e, "Failed to persist marker candidates");
                    return;
                }
                if found > 0 {
                    tracing::info!(
                        season_id = %season,
                        candidates = found,
                        "Season fingerprint aggregation produced intro candidates"
                    );
                    // Siblings that were not part of this batch pick their
                    // markers up on the next populate sweep.
                    self.marker_populate_queue.push_all(episodes);
                }
            }
            Err(e) => {
                tracing::warn!(season_id = %season, error = %e, "Season fingerprint aggregation failed");
            }
        }
    }

    /// Extract-if-needed, then fingerprint.
    async fn fingerprint_episode(&self, episode: &Episode) -> anyhow::Result<TaskOutcome> {
        if !self.collaborators.extractor.is_extracted(episode) {
            match self
                .collaborators
                .extractor
                .extract(episode, &self.cancel)
                .await?
            {
                TaskOutcome::Skipped => return Ok(TaskOutcome::Skipped),
                TaskOutcome::Completed { .. } => {}
            }
        }
        self.collaborators
            .fingerprinter
            .fingerprint(episode, &self.cancel)
            .await
    }

    async fn persist_candidates(
        &self,
        candidates: Vec<crate::tasks::MarkerCandidate>,
    ) -> anyhow::Result<()> {
        for candidate in candidates {
            let existing = self
                .collaborators
                .store
                .get_markers(candidate.episode)
                .await?;
            let new = vec![
                Marker::detected(MarkerKind::IntroStart, candidate.intro_start_ticks),
                Marker::detected(MarkerKind::IntroEnd, candidate.intro_end_ticks),
            ];
            let merged = model::merge_markers(&existing, &new);
            self.collaborators
                .store
                .save_markers(candidate.episode, merged)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Marker-populate family
    // ------------------------------------------------------------------

    async fn populate_loop(self: Arc<Self>) {
        let mut last_run: Option<Instant> = None;
        loop {
            if !self.throttle(last_run).await {
                break;
            }
            last_run = Some(Instant::now());

            let batch = (self.filters.marker_populate)(self.marker_populate_queue.drain_dedup());
            if batch.is_empty() {
                continue;
            }
            let filled = self.propagator.propagate_batch(&batch).await;
            tracing::debug!(batch = batch.len(), filled, "Marker populate sweep complete");
        }
        self.log_loop_exit("populate", self.marker_populate_queue.len());
    }
}
