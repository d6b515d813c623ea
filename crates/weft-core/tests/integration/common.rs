use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use weft_core::{
    Analyzer, ComponentId, CrawlError, Data, DispatchEvent, DispatchReporter, Downloader,
    IgnoreReason, Item, Kind, Module, ModuleBase, ParseResponse, Pipeline, ProcessItem, Request,
    Response, Scheduler,
};

/// In-memory site: each page's body is the list of links it contains, one
/// per line.
pub struct SiteDownloader {
    base: ModuleBase,
    pages: Arc<HashMap<String, Vec<String>>>,
    broken: HashSet<String>,
    fetched: Arc<Mutex<Vec<(String, u32)>>>,
}

impl SiteDownloader {
    pub fn new(serial: u64, pages: &[(&str, &[&str])]) -> Self {
        let pages = pages
            .iter()
            .map(|(url, links)| {
                (
                    url.to_string(),
                    links.iter().map(|l| l.to_string()).collect(),
                )
            })
            .collect();
        Self {
            base: ModuleBase::new(ComponentId::encode(Kind::Downloader, serial, None), None),
            pages: Arc::new(pages),
            broken: HashSet::new(),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Downloads of `url` fail with a connection error.
    pub fn with_broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    pub fn fetched(&self) -> Arc<Mutex<Vec<(String, u32)>>> {
        Arc::clone(&self.fetched)
    }
}

impl Module for SiteDownloader {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Downloader for SiteDownloader {
    async fn download(&self, req: &Request) -> Result<Response, CrawlError> {
        let _guard = self.base.begin();
        if !req.is_valid() {
            return Err(CrawlError::InvalidParameter("request has no host".into()));
        }
        self.base.incr_accepted();
        self.fetched
            .lock()
            .unwrap()
            .push((req.url.to_string(), req.depth));
        tokio::time::sleep(Duration::from_millis(2)).await;
        if self.broken.contains(req.url.as_str()) {
            return Err(CrawlError::Other(format!("connection reset by {}", req.url)));
        }

        let (status, body) = match self.pages.get(req.url.as_str()) {
            Some(links) => (200, links.join("\n")),
            None => (404, String::new()),
        };
        self.base.incr_completed();
        Ok(Response::new(
            req.url.clone(),
            status,
            Some(body.into_bytes()),
            req.depth,
        ))
    }
}

/// Follows every line of the body as a link and emits one item per page.
pub struct LinkAnalyzer {
    base: ModuleBase,
    parsers: Vec<ParseResponse>,
}

impl LinkAnalyzer {
    pub fn new(serial: u64) -> Self {
        Self {
            base: ModuleBase::new(ComponentId::encode(Kind::Analyzer, serial, None), None),
            parsers: Vec::new(),
        }
    }
}

impl Module for LinkAnalyzer {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Analyzer for LinkAnalyzer {
    fn resp_parsers(&self) -> &[ParseResponse] {
        &self.parsers
    }

    async fn analyze(&self, resp: &Response) -> (Vec<Data>, Vec<CrawlError>) {
        let _guard = self.base.begin();
        let Some(text) = resp.text() else {
            return (
                Vec::new(),
                vec![CrawlError::InvalidParameter("response has no body".into())],
            );
        };
        self.base.incr_accepted();

        let mut data = Vec::new();
        let mut errors = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match Url::parse(line.trim()) {
                Ok(url) => data.push(Data::Request(Request::new(url, resp.depth + 1))),
                Err(e) => errors.push(CrawlError::Other(format!("bad link {line:?}: {e}"))),
            }
        }
        data.push(Data::Item(
            Item::new()
                .with("url", resp.url.as_str())
                .with("status", resp.status)
                .with("depth", resp.depth),
        ));
        self.base.incr_completed();
        (data, errors)
    }
}

/// Pipeline that keeps every item it is sent.
pub struct CollectingPipeline {
    base: ModuleBase,
    processors: Vec<ProcessItem>,
    fail_fast: AtomicBool,
    items: Arc<Mutex<Vec<Item>>>,
}

impl CollectingPipeline {
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

impl Module for CollectingPipeline {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Pipeline for CollectingPipeline {
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

/// Keeps the submission gate's rejections.
#[derive(Clone, Default)]
pub struct GateRecorder {
    pub ignored: Arc<Mutex<Vec<(String, u32, IgnoreReason)>>>,
}

impl DispatchReporter for GateRecorder {
    fn report(&self, event: DispatchEvent<'_>) {
        if let DispatchEvent::RequestIgnored { url, depth, reason } = event {
            self.ignored
                .lock()
                .unwrap()
                .push((url.to_string(), depth, reason));
        }
    }
}

/// Polls until the scheduler has been idle for a few consecutive checks.
pub async fn wait_idle(sched: &Scheduler) {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut streak = 0;
        while streak < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            streak = if sched.idle() { streak + 1 } else { 0 };
        }
    })
    .await
    .expect("scheduler never became idle");
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}
