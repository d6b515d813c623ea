//! Arguments consumed by [`Scheduler::init`](crate::scheduler::Scheduler::init).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;
use crate::module::{Analyzer, Downloader, Pipeline, Worker};

/// Scope of the crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestArgs {
    /// Primary domains whose URLs may be crawled.
    #[serde(rename = "accepted_primary_domains")]
    pub accepted_domains: Vec<String>,
    /// Requests deeper than this are dropped. The seed sits at depth 0.
    pub max_depth: u32,
}

impl RequestArgs {
    pub fn new<I, S>(accepted_domains: I, max_depth: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted_domains: accepted_domains.into_iter().map(Into::into).collect(),
            max_depth,
        }
    }

    pub fn check(&self) -> Result<(), CrawlError> {
        if self.accepted_domains.is_empty() {
            return Err(CrawlError::InvalidParameter(
                "accepted domain list is empty".into(),
            ));
        }
        if self.accepted_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(CrawlError::InvalidParameter(
                "accepted domain list contains a blank entry".into(),
            ));
        }
        Ok(())
    }

    /// Same depth and the same domains in the same order.
    pub fn same(&self, other: &RequestArgs) -> bool {
        self == other
    }
}

/// Sizing of the four scheduler pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataArgs {
    pub req_buffer_cap: usize,
    pub req_max_buffer_number: usize,
    pub resp_buffer_cap: usize,
    pub resp_max_buffer_number: usize,
    pub item_buffer_cap: usize,
    pub item_max_buffer_number: usize,
    pub error_buffer_cap: usize,
    pub error_max_buffer_number: usize,
}

impl Default for DataArgs {
    fn default() -> Self {
        Self {
            req_buffer_cap: 50,
            req_max_buffer_number: 1000,
            resp_buffer_cap: 50,
            resp_max_buffer_number: 10,
            item_buffer_cap: 50,
            item_max_buffer_number: 100,
            error_buffer_cap: 50,
            error_max_buffer_number: 1,
        }
    }
}

impl DataArgs {
    /// Read pool sizing from environment variables, falling back to
    /// [`DataArgs::default`] for anything unset.
    ///
    /// - `WEFT_REQ_BUFFER_CAP`, `WEFT_REQ_MAX_BUFFERS`
    /// - `WEFT_RESP_BUFFER_CAP`, `WEFT_RESP_MAX_BUFFERS`
    /// - `WEFT_ITEM_BUFFER_CAP`, `WEFT_ITEM_MAX_BUFFERS`
    /// - `WEFT_ERROR_BUFFER_CAP`, `WEFT_ERROR_MAX_BUFFERS`
    pub fn from_env() -> Result<Self, CrawlError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CrawlError> {
        let defaults = Self::default();
        let read = |key: &str, default: usize| -> Result<usize, CrawlError> {
            let Some(raw) = lookup(key) else {
                return Ok(default);
            };
            let parsed: usize = raw.trim().parse().map_err(|_| {
                CrawlError::Config(format!(
                    "Invalid {key} '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(CrawlError::Config(format!("{key} must be at least 1")));
            }
            Ok(parsed)
        };

        Ok(Self {
            req_buffer_cap: read("WEFT_REQ_BUFFER_CAP", defaults.req_buffer_cap)?,
            req_max_buffer_number: read("WEFT_REQ_MAX_BUFFERS", defaults.req_max_buffer_number)?,
            resp_buffer_cap: read("WEFT_RESP_BUFFER_CAP", defaults.resp_buffer_cap)?,
            resp_max_buffer_number: read(
                "WEFT_RESP_MAX_BUFFERS",
                defaults.resp_max_buffer_number,
            )?,
            item_buffer_cap: read("WEFT_ITEM_BUFFER_CAP", defaults.item_buffer_cap)?,
            item_max_buffer_number: read(
                "WEFT_ITEM_MAX_BUFFERS",
                defaults.item_max_buffer_number,
            )?,
            error_buffer_cap: read("WEFT_ERROR_BUFFER_CAP", defaults.error_buffer_cap)?,
            error_max_buffer_number: read(
                "WEFT_ERROR_MAX_BUFFERS",
                defaults.error_max_buffer_number,
            )?,
        })
    }

    pub fn check(&self) -> Result<(), CrawlError> {
        let fields = [
            ("request buffer capacity", self.req_buffer_cap),
            ("request buffer limit", self.req_max_buffer_number),
            ("response buffer capacity", self.resp_buffer_cap),
            ("response buffer limit", self.resp_max_buffer_number),
            ("item buffer capacity", self.item_buffer_cap),
            ("item buffer limit", self.item_max_buffer_number),
            ("error buffer capacity", self.error_buffer_cap),
            ("error buffer limit", self.error_max_buffer_number),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(CrawlError::InvalidParameter(format!("{name} is zero"))),
            None => Ok(()),
        }
    }
}

/// Sizes of the worker lists in a [`ModuleArgs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleArgsSummary {
    pub downloader_list_size: usize,
    pub analyzer_list_size: usize,
    pub pipeline_list_size: usize,
}

/// Workers to register on init.
#[derive(Clone, Default)]
pub struct ModuleArgs {
    pub downloaders: Vec<Arc<dyn Downloader>>,
    pub analyzers: Vec<Arc<dyn Analyzer>>,
    pub pipelines: Vec<Arc<dyn Pipeline>>,
}

impl ModuleArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_downloader(mut self, d: impl Downloader + 'static) -> Self {
        self.downloaders.push(Arc::new(d));
        self
    }

    pub fn with_analyzer(mut self, a: impl Analyzer + 'static) -> Self {
        self.analyzers.push(Arc::new(a));
        self
    }

    pub fn with_pipeline(mut self, p: impl Pipeline + 'static) -> Self {
        self.pipelines.push(Arc::new(p));
        self
    }

    pub fn check(&self) -> Result<(), CrawlError> {
        if self.downloaders.is_empty() {
            return Err(CrawlError::InvalidParameter("empty downloader list".into()));
        }
        if self.analyzers.is_empty() {
            return Err(CrawlError::InvalidParameter("empty analyzer list".into()));
        }
        if self.pipelines.is_empty() {
            return Err(CrawlError::InvalidParameter("empty pipeline list".into()));
        }

        let mut ids = HashSet::new();
        for worker in self.workers() {
            let id = worker.id();
            if id.kind() != worker.kind() {
                return Err(CrawlError::InvalidParameter(format!(
                    "component {id} is a {} but its id names a {}",
                    worker.kind(),
                    id.kind()
                )));
            }
            if !ids.insert(id.clone()) {
                return Err(CrawlError::InvalidParameter(format!(
                    "component {id} is listed more than once"
                )));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> ModuleArgsSummary {
        ModuleArgsSummary {
            downloader_list_size: self.downloaders.len(),
            analyzer_list_size: self.analyzers.len(),
            pipeline_list_size: self.pipelines.len(),
        }
    }

    /// Every worker as a registry handle.
    pub fn workers(&self) -> impl Iterator<Item = Worker> + '_ {
        self.downloaders
            .iter()
            .cloned()
            .map(Worker::Downloader)
            .chain(self.analyzers.iter().cloned().map(Worker::Analyzer))
            .chain(self.pipelines.iter().cloned().map(Worker::Pipeline))
    }
}

impl fmt::Debug for ModuleArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleArgs")
            .field("summary", &self.summary())
            .finish()
    }
}
