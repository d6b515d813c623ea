//! Test utilities: stub implementations of the worker traits.
//!
//! Handwritten stubs for unit tests. Recorders use `Arc<Mutex<_>>` so
//! tests can keep a handle after the stub moves into the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::data::{Data, Item, Request, Response};
use crate::dispatch::{DispatchEvent, DispatchReporter, IgnoreReason};
use crate::error::CrawlError;
use crate::mid::{ComponentId, Kind};
use crate::module::{
    Analyzer, Downloader, Module, ModuleBase, ParseResponse, Pipeline, ProcessItem,
};

// ---------------------------------------------------------------------------
// StubDownloader
// ---------------------------------------------------------------------------

/// Downloader that answers every request with a tiny HTML page.
pub struct StubDownloader {
    base: ModuleBase,
    error: Option<CrawlError>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<Url>>>,
}

impl StubDownloader {
    pub fn new(serial: u64) -> Self {
        Self::with_id(ComponentId::encode(Kind::Downloader, serial, None))
    }

    pub fn with_id(id: ComponentId) -> Self {
        Self {
            base: ModuleBase::new(id, None),
            error: None,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every download fails with `error`.
    pub fn with_error(serial: u64, error: CrawlError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(serial)
        }
    }

    /// Every download takes `delay` before answering.
    pub fn with_delay(serial: u64, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(serial)
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Url>>> {
        Arc::clone(&self.calls)
    }
}

impl Module for StubDownloader {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Downloader for StubDownloader {
    async fn download(&self, req: &Request) -> Result<Response, CrawlError> {
        let _guard = self.base.begin();
        if !req.is_valid() {
            return Err(CrawlError::InvalidParameter("request has no host".into()));
        }
        self.base.incr_accepted();
        self.calls.lock().unwrap().push(req.url.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.base.incr_completed();
        Ok(Response::new(
            req.url.clone(),
            200,
            Some(b"<html><body>stub</body></html>".to_vec()),
            req.depth,
        ))
    }
}

// ---------------------------------------------------------------------------
// StubAnalyzer
// ---------------------------------------------------------------------------

/// Analyzer that turns every response into one item `{url, depth}`.
pub struct StubAnalyzer {
    base: ModuleBase,
    parsers: Vec<ParseResponse>,
}

impl StubAnalyzer {
    pub fn new(serial: u64) -> Self {
        Self {
            base: ModuleBase::new(ComponentId::encode(Kind::Analyzer, serial, None), None),
            parsers: Vec::new(),
        }
    }

    /// Runs `parser` on every response instead of the default item.
    pub fn with_parser(serial: u64, parser: ParseResponse) -> Self {
        Self {
            parsers: vec![parser],
            ..Self::new(serial)
        }
    }
}

impl Module for StubAnalyzer {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Analyzer for StubAnalyzer {
    fn resp_parsers(&self) -> &[ParseResponse] {
        &self.parsers
    }

    async fn analyze(&self, resp: &Response) -> (Vec<Data>, Vec<CrawlError>) {
        let _guard = self.base.begin();
        self.base.incr_accepted();
        self.base.incr_completed();
        if self.parsers.is_empty() {
            let item = Item::new()
                .with("url", resp.url.as_str())
                .with("depth", resp.depth);
            return (vec![Data::Item(item)], Vec::new());
        }
        let mut data = Vec::new();
        let mut errors = Vec::new();
        for parser in &self.parsers {
            let (d, e) = parser(resp);
            data.extend(d);
            errors.extend(e);
        }
        (data, errors)
    }
}

// ---------------------------------------------------------------------------
// StubPipeline
// ---------------------------------------------------------------------------

/// Pipeline that records every item it receives.
pub struct StubPipeline {
    base: ModuleBase,
    processors: Vec<ProcessItem>,
    fail_fast: AtomicBool,
    items: Arc<Mutex<Vec<Item>>>,
}

impl StubPipeline {
    pub fn new(serial: u64) -> Self {
        Self {
            base: ModuleBase::new(ComponentId::encode(Kind::Pipeline, serial, None), None),
            processors: Vec::new(),
            fail_fast: AtomicBool::new(false),
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn items(&self) -> Arc<Mutex<Vec<Item>>> {
        Arc::clone(&self.items)
    }
}

impl Module for StubPipeline {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Pipeline for StubPipeline {
    fn item_processors(&self) -> &[ProcessItem] {
        &self.processors
    }

    async fn send(&self, item: Item) -> Vec<CrawlError> {
        let _guard = self.base.begin();
        self.base.incr_accepted();
        self.items.lock().unwrap().push(item);
        self.base.incr_completed();
        Vec::new()
    }

    fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Acquire)
    }

    fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that keeps the gate's decisions for later assertions.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub accepted: Arc<Mutex<Vec<(String, u32)>>>,
    pub ignored: Arc<Mutex<Vec<(String, IgnoreReason)>>>,
    pub forward_failures: Arc<Mutex<usize>>,
}

impl DispatchReporter for RecordingReporter {
    fn report(&self, event: DispatchEvent<'_>) {
        match event {
            DispatchEvent::RequestAccepted { url, depth } => {
                self.accepted.lock().unwrap().push((url.to_string(), depth));
            }
            DispatchEvent::RequestIgnored { url, reason, .. } => {
                self.ignored.lock().unwrap().push((url.to_string(), reason));
            }
            DispatchEvent::ForwardFailed { .. } => {
                *self.forward_failures.lock().unwrap() += 1;
            }
            _ => {}
        }
    }
}
