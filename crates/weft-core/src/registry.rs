//! Worker registry with least-score selection.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CrawlError;
use crate::mid::{ComponentId, Kind};
use crate::module::{Worker, set_score};

type WorkerMap = HashMap<Kind, HashMap<ComponentId, Worker>>;

/// Thread-safe map of kind → id → worker.
#[derive(Debug, Default)]
pub struct Registry {
    workers: RwLock<WorkerMap>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a worker.
    ///
    /// Returns `Ok(false)` when a worker with the same id is already
    /// registered. Fails when the id's kind letter disagrees with the
    /// worker's actual capability.
    pub fn register(&self, worker: Worker) -> Result<bool, CrawlError> {
        let id = worker.id().clone();
        if id.kind() != worker.kind() {
            return Err(CrawlError::InvalidParameter(format!(
                "component {id} is a {} but its id names a {}",
                worker.kind(),
                id.kind()
            )));
        }

        let mut workers = self.write();
        let of_kind = workers.entry(worker.kind()).or_default();
        if of_kind.contains_key(&id) {
            tracing::debug!(%id, "Component already registered");
            return Ok(false);
        }
        of_kind.insert(id.clone(), worker);
        tracing::debug!(%id, "Registered component");
        Ok(true)
    }

    /// Removes a worker. An illegal id is simply reported as not removed.
    pub fn unregister(&self, id: &str) -> Result<bool, CrawlError> {
        let Ok(id) = ComponentId::parse(id) else {
            return Ok(false);
        };
        let mut workers = self.write();
        let removed = workers
            .get_mut(&id.kind())
            .is_some_and(|of_kind| of_kind.remove(&id).is_some());
        if removed {
            tracing::debug!(%id, "Unregistered component");
        }
        Ok(removed)
    }

    /// Picks the least-loaded worker of `kind`, refreshing every
    /// candidate's score first.
    pub fn get(&self, kind: Kind) -> Result<Worker, CrawlError> {
        let workers = self.read();
        let mut selected: Option<(&Worker, u32)> = None;
        for worker in workers.get(&kind).into_iter().flat_map(|m| m.values()) {
            set_score(worker.module());
            let score = worker.module().score();
            if selected.is_none_or(|(_, min)| score < min) {
                selected = Some((worker, score));
            }
        }
        selected
            .map(|(worker, _)| worker.clone())
            .ok_or_else(|| CrawlError::NotFound(format!("no {kind} is registered")))
    }

    /// Snapshot of every worker of `kind`.
    pub fn get_all_by_type(&self, kind: Kind) -> Result<HashMap<ComponentId, Worker>, CrawlError> {
        let workers = self.read();
        match workers.get(&kind) {
            Some(of_kind) if !of_kind.is_empty() => Ok(of_kind.clone()),
            _ => Err(CrawlError::NotFound(format!("no {kind} is registered"))),
        }
    }

    /// Snapshot of every registered worker.
    pub fn get_all(&self) -> HashMap<ComponentId, Worker> {
        self.read()
            .values()
            .flat_map(|of_kind| of_kind.iter().map(|(id, w)| (id.clone(), w.clone())))
            .collect()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: &str) -> bool {
        let Ok(id) = ComponentId::parse(id) else {
            return false;
        };
        self.read()
            .get(&id.kind())
            .is_some_and(|of_kind| of_kind.contains_key(&id))
    }

    fn read(&self) -> RwLockReadGuard<'_, WorkerMap> {
        self.workers.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned registry lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, WorkerMap> {
        self.workers.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned registry lock");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use crate::testutil::{StubAnalyzer, StubDownloader, StubPipeline};

    #[test]
    fn test_register_is_idempotent() {
        let registry = Registry::new();
        let d = Worker::downloader(StubDownloader::new(1));
        assert!(registry.register(d.clone()).unwrap());
        assert!(!registry.register(d).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_kind_mismatch() {
        let registry = Registry::new();
        let mislabeled = Worker::downloader(StubDownloader::with_id(
            ComponentId::encode(Kind::Pipeline, 9, None),
        ));
        assert!(matches!(
            registry.register(mislabeled),
            Err(CrawlError::InvalidParameter(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_returns_minimum_score() {
        let registry = Registry::new();
        let busy = StubDownloader::new(1);
        for _ in 0..5 {
            busy.base().incr_called();
        }
        let idle = StubDownloader::new(2);
        idle.base().incr_called();
        registry.register(Worker::downloader(busy)).unwrap();
        registry.register(Worker::downloader(idle)).unwrap();

        let picked = registry.get(Kind::Downloader).unwrap();
        assert_eq!(picked.id().as_str(), "D2");
        assert_eq!(picked.module().score(), 1);
    }

    #[test]
    fn test_zero_score_is_selectable() {
        let registry = Registry::new();
        let loaded = StubAnalyzer::new(1);
        loaded.base().incr_called();
        registry.register(Worker::analyzer(loaded)).unwrap();
        registry.register(Worker::analyzer(StubAnalyzer::new(2))).unwrap();

        let picked = registry.get(Kind::Analyzer).unwrap();
        assert_eq!(picked.id().as_str(), "A2");
        assert_eq!(picked.module().score(), 0);
    }

    #[test]
    fn test_get_empty_kind_is_not_found() {
        let registry = Registry::new();
        registry.register(Worker::pipeline(StubPipeline::new(1))).unwrap();
        assert!(matches!(
            registry.get(Kind::Downloader),
            Err(CrawlError::NotFound(_))
        ));
        assert!(registry.get_all_by_type(Kind::Analyzer).is_err());
        assert_eq!(registry.get_all_by_type(Kind::Pipeline).unwrap().len(), 1);
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = Registry::new();
        registry.register(Worker::downloader(StubDownloader::new(1))).unwrap();
        registry.register(Worker::analyzer(StubAnalyzer::new(1))).unwrap();
        registry.register(Worker::pipeline(StubPipeline::new(1))).unwrap();
        assert_eq!(registry.get_all().len(), 3);

        assert!(!registry.unregister("not-an-id").unwrap());
        assert!(!registry.unregister("D2").unwrap());
        assert!(registry.unregister("D1").unwrap());
        assert!(!registry.contains("D1"));
        assert!(registry.contains("A1"));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_contains_matches_exact_ids() {
        let registry = Registry::new();
        registry.register(Worker::downloader(StubDownloader::new(1))).unwrap();
        registry.register(Worker::analyzer(StubAnalyzer::new(12))).unwrap();

        assert!(registry.contains("D1"));
        assert!(registry.contains("A12"));
        assert!(!registry.contains("D12"));
        assert!(!registry.contains("A1"));
        assert!(!registry.contains("P1"));
        assert!(!registry.contains("bad id"));
        assert!(!registry.contains(""));
    }
}
