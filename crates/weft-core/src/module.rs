//! Worker components and the state they share.
//!
//! Every worker embeds a [`ModuleBase`] holding its id, score and
//! activity counters. The scheduler only ever sees workers through the
//! [`Worker`] handle, which is what the [`Registry`](crate::registry::Registry)
//! stores.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::{Data, Item, Request, Response};
use crate::error::CrawlError;
use crate::mid::{ComponentId, Kind};

/// Snapshot of a worker's activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub called: u32,
    pub accepted: u32,
    pub completed: u32,
    pub handling: u32,
}

/// Serializable description of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub id: ComponentId,
    pub called: u32,
    pub accepted: u32,
    pub completed: u32,
    pub handling: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Maps a worker's counters to a load score. Lower scores win selection.
pub type ScoreCalculator = fn(&Counts) -> u32;

/// Default score: the saturating sum of all four counters.
pub fn calculate_score_simple(counts: &Counts) -> u32 {
    counts
        .called
        .saturating_add(counts.accepted)
        .saturating_add(counts.completed)
        .saturating_add(counts.handling)
}

/// Recomputes a worker's score. Returns whether the score changed.
pub fn set_score(module: &dyn Module) -> bool {
    let score = (module.score_calculator())(&module.counts());
    if score == module.score() {
        return false;
    }
    module.set_score(score);
    true
}

/// Id, score and counters shared by every worker implementation.
#[derive(Debug)]
pub struct ModuleBase {
    id: ComponentId,
    calculator: ScoreCalculator,
    score: AtomicU32,
    called: AtomicU32,
    accepted: AtomicU32,
    completed: AtomicU32,
    handling: AtomicU32,
}

impl ModuleBase {
    /// `calculator` defaults to [`calculate_score_simple`].
    pub fn new(id: ComponentId, calculator: Option<ScoreCalculator>) -> Self {
        Self {
            id,
            calculator: calculator.unwrap_or(calculate_score_simple),
            score: AtomicU32::new(0),
            called: AtomicU32::new(0),
            accepted: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            handling: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn counts(&self) -> Counts {
        Counts {
            called: self.called.load(Ordering::Acquire),
            accepted: self.accepted.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            handling: self.handling.load(Ordering::Acquire),
        }
    }

    pub fn incr_called(&self) {
        self.called.fetch_add(1, Ordering::AcqRel);
    }

    pub fn incr_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::AcqRel);
    }

    pub fn incr_completed(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn incr_handling(&self) {
        self.handling.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decr_handling(&self) {
        let _ = self
            .handling
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Marks the start of one unit of work: bumps `called` and `handling`.
    /// `handling` drops again when the returned guard goes out of scope.
    pub fn begin(&self) -> HandlingGuard<'_> {
        self.incr_handling();
        self.incr_called();
        HandlingGuard { base: self }
    }

    /// Resets every counter to zero.
    pub fn clear(&self) {
        self.called.store(0, Ordering::Release);
        self.accepted.store(0, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.handling.store(0, Ordering::Release);
    }
}

/// Keeps a worker's `handling` counter raised while alive.
#[must_use = "handling drops as soon as the guard is dropped"]
pub struct HandlingGuard<'a> {
    base: &'a ModuleBase,
}

impl Drop for HandlingGuard<'_> {
    fn drop(&mut self) {
        self.base.decr_handling();
    }
}

/// Behaviour common to every worker.
pub trait Module: Send + Sync {
    fn base(&self) -> &ModuleBase;

    fn id(&self) -> &ComponentId {
        self.base().id()
    }

    fn addr(&self) -> Option<SocketAddr> {
        self.base().id().parts().addr
    }

    fn score(&self) -> u32 {
        self.base().score.load(Ordering::Acquire)
    }

    fn set_score(&self, score: u32) {
        self.base().score.store(score, Ordering::Release);
    }

    fn score_calculator(&self) -> ScoreCalculator {
        self.base().calculator
    }

    fn called_count(&self) -> u32 {
        self.base().called.load(Ordering::Acquire)
    }

    fn accepted_count(&self) -> u32 {
        self.base().accepted.load(Ordering::Acquire)
    }

    fn completed_count(&self) -> u32 {
        self.base().completed.load(Ordering::Acquire)
    }

    fn handling_number(&self) -> u32 {
        self.base().handling.load(Ordering::Acquire)
    }

    fn counts(&self) -> Counts {
        self.base().counts()
    }

    /// Implementations may override this to attach an `extra` payload.
    fn summary(&self) -> ModuleSummary {
        let counts = self.counts();
        ModuleSummary {
            id: self.id().clone(),
            called: counts.called,
            accepted: counts.accepted,
            completed: counts.completed,
            handling: counts.handling,
            extra: None,
        }
    }
}

/// Turns one response into zero or more requests and items.
pub type ParseResponse = Arc<dyn Fn(&Response) -> (Vec<Data>, Vec<CrawlError>) + Send + Sync>;

/// One step of an item pipeline.
pub type ProcessItem = Arc<dyn Fn(Item) -> Result<Item, CrawlError> + Send + Sync>;

/// Fetches requests.
#[async_trait]
pub trait Downloader: Module {
    async fn download(&self, req: &Request) -> Result<Response, CrawlError>;
}

/// Parses responses into follow-up requests and items.
#[async_trait]
pub trait Analyzer: Module {
    fn resp_parsers(&self) -> &[ParseResponse];

    async fn analyze(&self, resp: &Response) -> (Vec<Data>, Vec<CrawlError>);
}

/// Consumes items.
#[async_trait]
pub trait Pipeline: Module {
    fn item_processors(&self) -> &[ProcessItem];

    async fn send(&self, item: Item) -> Vec<CrawlError>;

    /// When set, the first failing processor ends processing of an item.
    fn fail_fast(&self) -> bool;

    fn set_fail_fast(&self, fail_fast: bool);
}

/// Type-tagged handle to a registered worker.
#[derive(Clone)]
pub enum Worker {
    Downloader(Arc<dyn Downloader>),
    Analyzer(Arc<dyn Analyzer>),
    Pipeline(Arc<dyn Pipeline>),
}

impl Worker {
    pub fn downloader(d: impl Downloader + 'static) -> Self {
        Worker::Downloader(Arc::new(d))
    }

    pub fn analyzer(a: impl Analyzer + 'static) -> Self {
        Worker::Analyzer(Arc::new(a))
    }

    pub fn pipeline(p: impl Pipeline + 'static) -> Self {
        Worker::Pipeline(Arc::new(p))
    }

    /// Kind implied by the variant, which may disagree with the id's letter.
    pub fn kind(&self) -> Kind {
        match self {
            Worker::Downloader(_) => Kind::Downloader,
            Worker::Analyzer(_) => Kind::Analyzer,
            Worker::Pipeline(_) => Kind::Pipeline,
        }
    }

    pub fn module(&self) -> &dyn Module {
        match self {
            Worker::Downloader(d) => d.as_ref(),
            Worker::Analyzer(a) => a.as_ref(),
            Worker::Pipeline(p) => p.as_ref(),
        }
    }

    pub fn id(&self) -> &ComponentId {
        self.module().id()
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("kind", &self.kind())
            .field("id", self.id())
            .field("score", &self.module().score())
            .finish()
    }
}
