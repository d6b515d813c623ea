//! Crawl scheduler: lifecycle, wiring and introspection.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::args::{DataArgs, ModuleArgs, ModuleArgsSummary, RequestArgs};
use crate::data::Request;
use crate::dispatch::{DispatchReporter, Dispatcher, Pools, Scope, TracingDispatchReporter};
use crate::domain::primary_domain_of;
use crate::error::CrawlError;
use crate::mid::Kind;
use crate::module::ModuleSummary;
use crate::registry::Registry;
use crate::status::{Status, check_status};
use crate::summary::SchedSummary;

#[derive(Debug, Clone)]
struct InitArgs {
    request: RequestArgs,
    data: DataArgs,
    modules: ModuleArgsSummary,
}

/// Drives requests through downloaders, analyzers and pipelines.
///
/// All methods take `&self`; wrap the scheduler in an `Arc` to share it.
/// [`start`](Self::start) and [`error_chan`](Self::error_chan) spawn tasks
/// and must be called from within a tokio runtime.
pub struct Scheduler {
    status: Mutex<Status>,
    registry: Arc<Registry>,
    scope: Arc<Scope>,
    /// In-flight count of the current run. Each `start` gets its own so
    /// loops of a stopped run cannot touch it.
    pending: Mutex<Arc<AtomicUsize>>,
    pools: RwLock<Option<Pools>>,
    /// Set once the error pool of the current pools has a forwarder.
    error_chan_taken: AtomicBool,
    cancel: Mutex<CancellationToken>,
    args: RwLock<Option<InitArgs>>,
    reporter: Arc<dyn DispatchReporter>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(TracingDispatchReporter))
    }

    /// Scheduler whose dispatch loops report to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn DispatchReporter>) -> Self {
        Self {
            status: Mutex::new(Status::Uninitialized),
            registry: Arc::new(Registry::new()),
            scope: Arc::new(Scope::default()),
            pending: Mutex::new(Arc::new(AtomicUsize::new(0))),
            pools: RwLock::new(None),
            error_chan_taken: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            args: RwLock::new(None),
            reporter,
        }
    }

    /// Validates the arguments, builds fresh pools and registers every
    /// worker. Allowed from `Uninitialized`, `Initialized` and `Stopped`.
    pub fn init(
        &self,
        request_args: RequestArgs,
        data_args: DataArgs,
        module_args: ModuleArgs,
    ) -> Result<(), CrawlError> {
        tracing::info!("Initializing scheduler");
        let previous = self.check_and_set_status(Status::Initializing)?;
        let result = self.init_inner(request_args, data_args, module_args);
        self.settle(previous, Status::Initialized, &result);
        if result.is_ok() {
            tracing::info!("Scheduler initialized");
        }
        result
    }

    fn init_inner(
        &self,
        request_args: RequestArgs,
        data_args: DataArgs,
        module_args: ModuleArgs,
    ) -> Result<(), CrawlError> {
        request_args.check()?;
        data_args.check()?;
        module_args.check()?;
        // Everything fallible happens before the first mutation.
        let pools = Pools::new(&data_args)?;

        self.registry.clear();
        for worker in module_args.workers() {
            self.registry.register(worker)?;
        }
        self.scope
            .reset(&request_args.accepted_domains, request_args.max_depth);
        tracing::info!(
            max_depth = request_args.max_depth,
            domains = ?request_args.accepted_domains,
            "Crawl scope set"
        );

        {
            let mut slot = self.pools.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(old) = slot.take() {
                old.close_all();
            }
            *slot = Some(pools);
        }
        self.error_chan_taken.store(false, Ordering::Release);
        tracing::info!(
            req_buffer_cap = data_args.req_buffer_cap,
            req_max_buffers = data_args.req_max_buffer_number,
            resp_buffer_cap = data_args.resp_buffer_cap,
            resp_max_buffers = data_args.resp_max_buffer_number,
            item_buffer_cap = data_args.item_buffer_cap,
            item_max_buffers = data_args.item_max_buffer_number,
            error_buffer_cap = data_args.error_buffer_cap,
            error_max_buffers = data_args.error_max_buffer_number,
            "Buffer pools created"
        );

        {
            let mut cancel = self.lock_cancel();
            cancel.cancel();
            *cancel = CancellationToken::new();
        }
        *self.lock_pending() = Arc::new(AtomicUsize::new(0));
        *self.args.write().unwrap_or_else(PoisonError::into_inner) = Some(InitArgs {
            request: request_args,
            data: data_args,
            modules: module_args.summary(),
        });

        let summary = module_args.summary();
        tracing::info!(
            downloaders = summary.downloader_list_size,
            analyzers = summary.analyzer_list_size,
            pipelines = summary.pipeline_list_size,
            "Components registered"
        );
        Ok(())
    }

    /// Spawns the dispatch loops and submits `seed` at depth 0. The seed's
    /// primary domain is added to the accepted domains.
    pub fn start(&self, seed: Url) -> Result<(), CrawlError> {
        tracing::info!(%seed, "Starting scheduler");
        let previous = self.check_and_set_status(Status::Starting)?;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.start_inner(seed)))
            .unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(%message, "Scheduler panicked while starting");
                Err(CrawlError::Scheduler(format!("panic while starting: {message}")))
            });
        self.settle(previous, Status::Started, &result);
        if result.is_ok() {
            tracing::info!("Scheduler started");
        }
        result
    }

    fn start_inner(&self, seed: Url) -> Result<(), CrawlError> {
        let runtime = Handle::try_current().map_err(|_| {
            CrawlError::Scheduler("start must be called within a tokio runtime".into())
        })?;
        let domain = primary_domain_of(&seed)?;
        tracing::info!(%domain, "Accepting primary domain of the seed");
        self.scope.accept(domain);

        let pools = {
            let mut slot = self.pools.write().unwrap_or_else(PoisonError::into_inner);
            let pools = slot
                .as_ref()
                .ok_or_else(|| CrawlError::Scheduler("buffer pools are missing".into()))?
                .reopened()?;
            *slot = Some(pools.clone());
            pools
        };

        let pending = Arc::new(AtomicUsize::new(0));
        *self.lock_pending() = Arc::clone(&pending);

        let dispatcher = Dispatcher {
            registry: Arc::clone(&self.registry),
            pools,
            scope: Arc::clone(&self.scope),
            cancel: self.cancel_token(),
            pending,
            reporter: Arc::clone(&self.reporter),
        };
        dispatcher.spawn_loops(&runtime);
        if !dispatcher.submit(Request::new(seed, 0)) {
            tracing::warn!("Seed request was not admitted");
        }
        Ok(())
    }

    /// Cancels the dispatch loops and closes every pool.
    pub fn stop(&self) -> Result<(), CrawlError> {
        tracing::info!("Stopping scheduler");
        let previous = self.check_and_set_status(Status::Stopping)?;
        self.cancel_token().cancel();
        if let Some(pools) = self.current_pools() {
            pools.close_all();
        }
        self.settle(previous, Status::Stopped, &Ok(()));
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    pub fn status(&self) -> Status {
        *self.lock_status()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// True when no worker is busy and no work is queued or in flight.
    pub fn idle(&self) -> bool {
        if self
            .registry
            .get_all()
            .values()
            .any(|w| w.module().handling_number() > 0)
        {
            return false;
        }
        if let Some(pools) = self.current_pools() {
            if pools.req.total() > 0 || pools.resp.total() > 0 || pools.item.total() > 0 {
                return false;
            }
        }
        self.pending_count() == 0
    }

    /// Streams classified errors from the error pool until the scheduler
    /// stops. Errors nobody receives stay queued in the pool.
    ///
    /// There is one receiver per `init`: a second call before the next
    /// `init` fails with `InvalidState`. Errors drawn when `stop` lands are
    /// still handed over if the channel has room, and logged otherwise.
    pub fn error_chan(&self) -> Result<mpsc::Receiver<CrawlError>, CrawlError> {
        let runtime = Handle::try_current().map_err(|_| {
            CrawlError::Scheduler("error_chan must be called within a tokio runtime".into())
        })?;
        let pools = self
            .current_pools()
            .ok_or_else(|| CrawlError::InvalidState("scheduler is not initialized".into()))?;
        if self.error_chan_taken.swap(true, Ordering::AcqRel) {
            return Err(CrawlError::InvalidState(
                "error channel is already taken for this run".into(),
            ));
        }
        let errors = pools.error;
        let cancel = self.cancel_token();
        let (tx, rx) = mpsc::channel(errors.buffer_cap());

        runtime.spawn(async move {
            loop {
                let err = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = errors.recv() => match received {
                        Ok(err) => err,
                        Err(_) => break,
                    },
                };
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        if let Err(e) = tx.try_send(err) {
                            tracing::warn!(error = %e.into_inner(), "Error dropped at stop");
                        }
                        break;
                    }
                    permit = tx.reserve() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                permit.send(err);
            }
            tracing::debug!("Error channel closed");
        });
        Ok(rx)
    }

    pub fn summary(&self) -> SchedSummary {
        let args = self
            .args
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let pools = self.current_pools().map(|p| p.summaries());
        let pool = |i: usize| pools.as_ref().map(|p| p[i]);

        SchedSummary {
            status: self.status(),
            request_args: args.as_ref().map(|a| a.request.clone()),
            data_args: args.as_ref().map(|a| a.data),
            module_args: args.as_ref().map(|a| a.modules),
            downloaders: self.module_summaries(Kind::Downloader),
            analyzers: self.module_summaries(Kind::Analyzer),
            pipelines: self.module_summaries(Kind::Pipeline),
            req_buffer_pool: pool(0),
            resp_buffer_pool: pool(1),
            item_buffer_pool: pool(2),
            error_buffer_pool: pool(3),
            url_count: self.scope.seen_count(),
        }
    }

    fn module_summaries(&self, kind: Kind) -> Vec<ModuleSummary> {
        let mut summaries: Vec<ModuleSummary> = self
            .registry
            .get_all_by_type(kind)
            .map(|workers| workers.values().map(|w| w.module().summary()).collect())
            .unwrap_or_default();
        summaries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        summaries
    }

    fn check_and_set_status(&self, wanted: Status) -> Result<Status, CrawlError> {
        let mut status = self.lock_status();
        let previous = *status;
        if let Err(err) = check_status(previous, wanted) {
            tracing::warn!(current = %previous, %wanted, "Status transition refused");
            return Err(err);
        }
        *status = wanted;
        Ok(previous)
    }

    /// Ends a transition: `done` on success, back to `previous` on failure.
    fn settle(&self, previous: Status, done: Status, result: &Result<(), CrawlError>) {
        let mut status = self.lock_status();
        *status = match result {
            Ok(()) => done,
            Err(err) => {
                tracing::warn!(error = %err, restored = %previous, "Transition failed");
                previous
            }
        };
    }

    fn current_pools(&self) -> Option<Pools> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn pending_count(&self) -> usize {
        self.lock_pending().load(Ordering::Acquire)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Arc<AtomicUsize>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_token(&self) -> CancellationToken {
        self.lock_cancel().clone()
    }

    fn lock_status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned status lock");
            poisoned.into_inner()
        })
    }

    fn lock_cancel(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("status", &self.status())
            .field("registered", &self.registry.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}
