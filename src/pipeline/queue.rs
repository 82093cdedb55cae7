//! Item queues and work items for the orchestration pipeline.

use std::collections::{HashSet, VecDeque};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::model::{Episode, EpisodeId};
use crate::tasks::TaskOutcome;

/// Which queue a work item came from; selects its concurrency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    MediaInfo,
    Subtitle,
    Fingerprint,
    MarkerPopulate,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::MediaInfo => write!(f, "media_info"),
            QueueKind::Subtitle => write!(f, "subtitle"),
            QueueKind::Fingerprint => write!(f, "fingerprint"),
            QueueKind::MarkerPopulate => write!(f, "marker_populate"),
        }
    }
}

/// An unbounded episode queue drained in batches by a pipeline loop.
#[derive(Debug)]
pub struct ItemQueue {
    kind: QueueKind,
    items: Mutex<VecDeque<Episode>>,
}

impl ItemQueue {
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn push(&self, episode: Episode) {
        self.items.lock().push_back(episode);
    }

    pub fn push_all(&self, episodes: impl IntoIterator<Item = Episode>) {
        let mut items = self.items.lock();
        items.extend(episodes);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Atomically drain the queue into a batch, deduplicated by episode
    /// identity keeping the first occurrence.
    pub fn drain_dedup(&self) -> Vec<Episode> {
        let drained: Vec<Episode> = self.items.lock().drain(..).collect();
        let mut seen: HashSet<EpisodeId> = HashSet::with_capacity(drained.len());
        drained
            .into_iter()
            .filter(|e| seen.insert(e.id))
            .collect()
    }
}

/// A unit of dispatchable work: the episode it concerns, the queue it came
/// from, and an opaque action wrapping the collaborator call.
pub struct WorkItem {
    pub source: QueueKind,
    pub episode: Episode,
    pub action: BoxFuture<'static, anyhow::Result<TaskOutcome>>,
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("source", &self.source)
            .field("episode", &self.episode.id)
            .finish_non_exhaustive()
    }
}
