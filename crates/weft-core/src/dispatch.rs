//! The three dispatch loops and the request submission gate.
//!
//! Each loop parks on its source pool, picks the least-loaded worker of the
//! matching kind from the registry, and forwards whatever the worker
//! produces. Forwarding never waits: a full or closed destination pool is
//! reported and the datum is dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::args::DataArgs;
use crate::data::{Data, Item, Request, Response};
use crate::domain::primary_domain;
use crate::error::{BufferError, CrawlError};
use crate::mid::Kind;
use crate::module::Worker;
use crate::pool::{BufferPool, PoolSummary};
use crate::registry::Registry;

/// Pause before a datum is put back because no worker could take it.
pub const RESUBMIT_DELAY: Duration = Duration::from_millis(50);

/// Why the submission gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreReason {
    Cancelled,
    NoHost,
    UnsupportedScheme,
    AlreadySeen,
    OutOfScope,
    TooDeep,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::Cancelled => "scheduler stopped",
            IgnoreReason::NoHost => "no host",
            IgnoreReason::UnsupportedScheme => "unsupported scheme",
            IgnoreReason::AlreadySeen => "already seen",
            IgnoreReason::OutOfScope => "domain not accepted",
            IgnoreReason::TooDeep => "too deep",
        }
    }
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the dispatch loops for monitoring/logging.
#[derive(Debug, Clone)]
pub enum DispatchEvent<'a> {
    LoopStarted {
        stage: Kind,
    },
    LoopStopped {
        stage: Kind,
    },
    RequestAccepted {
        url: &'a Url,
        depth: u32,
    },
    RequestIgnored {
        url: &'a Url,
        depth: u32,
        reason: IgnoreReason,
    },
    Downloaded {
        id: &'a str,
        url: &'a Url,
        status: u16,
    },
    Analyzed {
        id: &'a str,
        url: &'a Url,
        requests: usize,
        items: usize,
    },
    ItemSent {
        id: &'a str,
        errors: usize,
    },
    NoWorker {
        stage: Kind,
        error: &'a CrawlError,
    },
    ForwardFailed {
        pool: &'static str,
        error: BufferError,
    },
    ErrorReported {
        error: &'a CrawlError,
    },
}

/// Receives dispatch events (decoupled logging).
pub trait DispatchReporter: Send + Sync {
    fn report(&self, event: DispatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatchReporter;

impl DispatchReporter for TracingDispatchReporter {
    fn report(&self, event: DispatchEvent<'_>) {
        match event {
            DispatchEvent::LoopStarted { stage } => {
                tracing::debug!(%stage, "Dispatch loop started");
            }
            DispatchEvent::LoopStopped { stage } => {
                tracing::debug!(%stage, "Dispatch loop stopped");
            }
            DispatchEvent::RequestAccepted { url, depth } => {
                tracing::debug!(%url, depth, "Request accepted");
            }
            DispatchEvent::RequestIgnored { url, depth, reason } => {
                tracing::debug!(%url, depth, %reason, "Request ignored");
            }
            DispatchEvent::Downloaded { id, url, status } => {
                tracing::info!(%id, %url, status, "Page downloaded");
            }
            DispatchEvent::Analyzed {
                id,
                url,
                requests,
                items,
            } => {
                tracing::debug!(%id, %url, requests, items, "Response analyzed");
            }
            DispatchEvent::ItemSent { id, errors } => {
                tracing::debug!(%id, errors, "Item sent through pipeline");
            }
            DispatchEvent::NoWorker { stage, error } => {
                tracing::warn!(%stage, %error, "No worker available, resubmitting");
            }
            DispatchEvent::ForwardFailed { pool, error } => {
                tracing::warn!(pool, %error, "Dropping datum");
            }
            DispatchEvent::ErrorReported { error } => {
                tracing::debug!(%error, "Error reported");
            }
        }
    }
}

/// The four pools a scheduler routes data through.
#[derive(Debug, Clone)]
pub(crate) struct Pools {
    pub(crate) req: Arc<BufferPool<Request>>,
    pub(crate) resp: Arc<BufferPool<Response>>,
    pub(crate) item: Arc<BufferPool<Item>>,
    pub(crate) error: Arc<BufferPool<CrawlError>>,
}

impl Pools {
    pub(crate) fn new(args: &DataArgs) -> Result<Self, CrawlError> {
        Ok(Self {
            req: Arc::new(BufferPool::new(args.req_buffer_cap, args.req_max_buffer_number)?),
            resp: Arc::new(BufferPool::new(
                args.resp_buffer_cap,
                args.resp_max_buffer_number,
            )?),
            item: Arc::new(BufferPool::new(
                args.item_buffer_cap,
                args.item_max_buffer_number,
            )?),
            error: Arc::new(BufferPool::new(
                args.error_buffer_cap,
                args.error_max_buffer_number,
            )?),
        })
    }

    /// Copy with every closed pool replaced by a fresh one of the same
    /// sizing. Open pools are shared.
    pub(crate) fn reopened(&self) -> Result<Self, CrawlError> {
        fn reopen<T>(pool: &Arc<BufferPool<T>>) -> Result<Arc<BufferPool<T>>, CrawlError> {
            if pool.is_closed() {
                Ok(Arc::new(BufferPool::new(
                    pool.buffer_cap(),
                    pool.max_buffers(),
                )?))
            } else {
                Ok(Arc::clone(pool))
            }
        }
        Ok(Self {
            req: reopen(&self.req)?,
            resp: reopen(&self.resp)?,
            item: reopen(&self.item)?,
            error: reopen(&self.error)?,
        })
    }

    pub(crate) fn close_all(&self) {
        self.req.close();
        self.resp.close();
        self.item.close();
        self.error.close();
    }

    pub(crate) fn summaries(&self) -> [PoolSummary; 4] {
        [
            self.req.summary(),
            self.resp.summary(),
            self.item.summary(),
            self.error.summary(),
        ]
    }
}

/// Crawl scope: accepted domains, depth cap and the URLs already submitted.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    accepted: RwLock<HashSet<String>>,
    max_depth: AtomicU32,
    seen: Mutex<HashSet<String>>,
}

impl Scope {
    pub(crate) fn reset(&self, domains: &[String], max_depth: u32) {
        let domains = domains
            .iter()
            .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
            .collect();
        *self.accepted.write().unwrap_or_else(PoisonError::into_inner) = domains;
        self.max_depth.store(max_depth, Ordering::Release);
        self.seen().clear();
    }

    pub(crate) fn accept(&self, domain: String) {
        self.accepted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain);
    }

    pub(crate) fn is_accepted(&self, domain: &str) -> bool {
        self.accepted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(domain)
    }

    pub(crate) fn max_depth(&self) -> u32 {
        self.max_depth.load(Ordering::Acquire)
    }

    pub(crate) fn seen_count(&self) -> usize {
        self.seen().len()
    }

    fn seen(&self) -> MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned URL set lock");
            poisoned.into_inner()
        })
    }
}

/// Everything the dispatch loops of one run share.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<Registry>,
    pub(crate) pools: Pools,
    pub(crate) scope: Arc<Scope>,
    pub(crate) cancel: CancellationToken,
    /// Data admitted into the request, response or item pool and not yet
    /// fully handled. Outputs are counted before their parent is released.
    pub(crate) pending: Arc<AtomicUsize>,
    pub(crate) reporter: Arc<dyn DispatchReporter>,
}

impl Dispatcher {
    pub(crate) fn spawn_loops(&self, runtime: &tokio::runtime::Handle) {
        runtime.spawn(self.clone().download_loop());
        runtime.spawn(self.clone().analyze_loop());
        runtime.spawn(self.clone().pick_loop());
    }

    async fn download_loop(self) {
        self.reporter.report(DispatchEvent::LoopStarted {
            stage: Kind::Downloader,
        });
        loop {
            let req = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                received = self.pools.req.recv() => match received {
                    Ok(req) => req,
                    Err(_) => break,
                },
            };
            self.download_one(req).await;
            self.release();
        }
        self.reporter.report(DispatchEvent::LoopStopped {
            stage: Kind::Downloader,
        });
    }

    async fn download_one(&self, req: Request) {
        let downloader = match self.registry.get(Kind::Downloader) {
            Ok(Worker::Downloader(d)) => d,
            Ok(other) => {
                let err = mismatched(&other, Kind::Downloader);
                self.report_error(err, Some(other.id().as_str()));
                return self.resubmit(&self.pools.req, req, "request").await;
            }
            Err(err) => {
                self.reporter.report(DispatchEvent::NoWorker {
                    stage: Kind::Downloader,
                    error: &err,
                });
                self.report_error(err, None);
                return self.resubmit(&self.pools.req, req, "request").await;
            }
        };

        let id = downloader.id().clone();
        match downloader.download(&req).await {
            Ok(resp) => {
                self.reporter.report(DispatchEvent::Downloaded {
                    id: id.as_str(),
                    url: &resp.url,
                    status: resp.status,
                });
                self.forward(&self.pools.resp, resp, "response");
            }
            Err(err) => self.report_error(err, Some(id.as_str())),
        }
    }

    async fn analyze_loop(self) {
        self.reporter.report(DispatchEvent::LoopStarted {
            stage: Kind::Analyzer,
        });
        loop {
            let resp = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                received = self.pools.resp.recv() => match received {
                    Ok(resp) => resp,
                    Err(_) => break,
                },
            };
            self.analyze_one(resp).await;
            self.release();
        }
        self.reporter.report(DispatchEvent::LoopStopped {
            stage: Kind::Analyzer,
        });
    }

    async fn analyze_one(&self, resp: Response) {
        let analyzer = match self.registry.get(Kind::Analyzer) {
            Ok(Worker::Analyzer(a)) => a,
            Ok(other) => {
                let err = mismatched(&other, Kind::Analyzer);
                self.report_error(err, Some(other.id().as_str()));
                return self.resubmit(&self.pools.resp, resp, "response").await;
            }
            Err(err) => {
                self.reporter.report(DispatchEvent::NoWorker {
                    stage: Kind::Analyzer,
                    error: &err,
                });
                self.report_error(err, None);
                return self.resubmit(&self.pools.resp, resp, "response").await;
            }
        };

        let id = analyzer.id().clone();
        let (data, errors) = analyzer.analyze(&resp).await;
        let (mut requests, mut items) = (0, 0);
        for datum in data {
            match datum {
                Data::Request(req) => {
                    requests += 1;
                    self.submit(req);
                }
                Data::Item(item) => {
                    items += 1;
                    self.forward(&self.pools.item, item, "item");
                }
                Data::Response(unexpected) => {
                    let err = CrawlError::TypeMismatch(format!(
                        "analyzer produced a response for {}",
                        unexpected.url
                    ));
                    self.report_error(err, Some(id.as_str()));
                }
            }
        }
        self.reporter.report(DispatchEvent::Analyzed {
            id: id.as_str(),
            url: &resp.url,
            requests,
            items,
        });
        for err in errors {
            self.report_error(err, Some(id.as_str()));
        }
    }

    async fn pick_loop(self) {
        self.reporter.report(DispatchEvent::LoopStarted {
            stage: Kind::Pipeline,
        });
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                received = self.pools.item.recv() => match received {
                    Ok(item) => item,
                    Err(_) => break,
                },
            };
            self.pick_one(item).await;
            self.release();
        }
        self.reporter.report(DispatchEvent::LoopStopped {
            stage: Kind::Pipeline,
        });
    }

    async fn pick_one(&self, item: Item) {
        let pipeline = match self.registry.get(Kind::Pipeline) {
            Ok(Worker::Pipeline(p)) => p,
            Ok(other) => {
                let err = mismatched(&other, Kind::Pipeline);
                self.report_error(err, Some(other.id().as_str()));
                return self.resubmit(&self.pools.item, item, "item").await;
            }
            Err(err) => {
                self.reporter.report(DispatchEvent::NoWorker {
                    stage: Kind::Pipeline,
                    error: &err,
                });
                self.report_error(err, None);
                return self.resubmit(&self.pools.item, item, "item").await;
            }
        };

        let id = pipeline.id().clone();
        let errors = pipeline.send(item).await;
        self.reporter.report(DispatchEvent::ItemSent {
            id: id.as_str(),
            errors: errors.len(),
        });
        for err in errors {
            self.report_error(err, Some(id.as_str()));
        }
    }

    /// The submission gate. Every request, the seed included, passes
    /// through here; rejected requests are dropped without an error.
    pub(crate) fn submit(&self, req: Request) -> bool {
        match self.admit(&req) {
            Err(reason) => {
                self.reporter.report(DispatchEvent::RequestIgnored {
                    url: &req.url,
                    depth: req.depth,
                    reason,
                });
                false
            }
            Ok(()) => {
                self.reporter.report(DispatchEvent::RequestAccepted {
                    url: &req.url,
                    depth: req.depth,
                });
                self.forward(&self.pools.req, req, "request")
            }
        }
    }

    fn admit(&self, req: &Request) -> Result<(), IgnoreReason> {
        if self.cancel.is_cancelled() {
            return Err(IgnoreReason::Cancelled);
        }
        let url = &req.url;
        let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
            return Err(IgnoreReason::NoHost);
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IgnoreReason::UnsupportedScheme);
        }
        if self.scope.seen().contains(url.as_str()) {
            return Err(IgnoreReason::AlreadySeen);
        }
        match primary_domain(host) {
            Ok(domain) if self.scope.is_accepted(&domain) => {}
            _ => return Err(IgnoreReason::OutOfScope),
        }
        if req.depth > self.scope.max_depth() {
            return Err(IgnoreReason::TooDeep);
        }
        // Re-checked on insert: two analyzers may race on the same link.
        if !self.scope.seen().insert(url.as_str().to_string()) {
            return Err(IgnoreReason::AlreadySeen);
        }
        Ok(())
    }

    /// Puts a datum into a work pool without waiting.
    fn forward<T>(&self, pool: &BufferPool<T>, datum: T, name: &'static str) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        match pool.put(datum) {
            Ok(()) => true,
            Err(error) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                self.reporter
                    .report(DispatchEvent::ForwardFailed { pool: name, error });
                false
            }
        }
    }

    /// Puts a datum back into its source pool after a short pause.
    async fn resubmit<T>(&self, pool: &BufferPool<T>, datum: T, name: &'static str) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            () = tokio::time::sleep(RESUBMIT_DELAY) => {}
        }
        self.forward(pool, datum, name);
    }

    /// Marks one drawn datum as fully handled.
    fn release(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Classifies an error and pushes it to the error pool.
    pub(crate) fn report_error(&self, err: CrawlError, id: Option<&str>) {
        let err = err.classify(id);
        self.reporter
            .report(DispatchEvent::ErrorReported { error: &err });
        if self.pools.error.is_closed() {
            return;
        }
        if let Err(error) = self.pools.error.put(err) {
            self.reporter.report(DispatchEvent::ForwardFailed {
                pool: "error",
                error,
            });
        }
    }
}

fn mismatched(worker: &Worker, wanted: Kind) -> CrawlError {
    CrawlError::TypeMismatch(format!(
        "registry returned {} {} where a {wanted} was expected",
        worker.kind(),
        worker.id()
    ))
}
