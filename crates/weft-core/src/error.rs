use thiserror::Error;

use crate::mid::Kind;

/// Failures of a single buffer or a buffer pool.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer or pool was closed.
    #[error("buffer is closed")]
    Closed,

    /// The buffer holds `cap` data already.
    #[error("buffer is full")]
    Full,

    /// Nothing is queued.
    #[error("buffer is empty")]
    Empty,

    /// Every buffer is full and the pool may not grow any further.
    #[error("buffer pool is saturated")]
    PoolSaturated,

    /// `close` was called on an already-closed buffer.
    #[error("buffer is already closed")]
    AlreadyClosed,
}

/// Which stage of the engine an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Downloader,
    Analyzer,
    Pipeline,
    Scheduler,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Downloader => "downloader",
            ErrorKind::Analyzer => "analyzer",
            ErrorKind::Pipeline => "pipeline",
            ErrorKind::Scheduler => "scheduler",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type shared by every part of the crawl engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlError {
    /// A caller-supplied value failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The scheduler refused a lifecycle transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No component of the requested kind is registered.
    #[error("not found: {0}")]
    NotFound(String),

    /// A worker produced or was handed the wrong sort of value.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Raised by, or attributed to, a downloader.
    #[error("downloader error: {0}")]
    Download(String),

    /// Raised by, or attributed to, an analyzer.
    #[error("analyzer error: {0}")]
    Analyze(String),

    /// Raised by, or attributed to, a pipeline.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Raised by the scheduler itself.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Environment or argument configuration could not be read.
    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl CrawlError {
    /// The stage this error is attributed to, if it has been classified.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CrawlError::Download(_) => Some(ErrorKind::Downloader),
            CrawlError::Analyze(_) => Some(ErrorKind::Analyzer),
            CrawlError::Pipeline(_) => Some(ErrorKind::Pipeline),
            CrawlError::Scheduler(_) => Some(ErrorKind::Scheduler),
            _ => None,
        }
    }

    /// Attributes an error to the component that produced it.
    ///
    /// Already-classified errors pass through untouched. Otherwise the kind
    /// encoded in `id` decides the wrapper; a missing or illegal id falls
    /// back to [`ErrorKind::Scheduler`].
    pub fn classify(self, id: Option<&str>) -> CrawlError {
        if self.kind().is_some() {
            return self;
        }
        let message = self.to_string();
        match id.and_then(Kind::of) {
            Some(Kind::Downloader) => CrawlError::Download(message),
            Some(Kind::Analyzer) => CrawlError::Analyze(message),
            Some(Kind::Pipeline) => CrawlError::Pipeline(message),
            None => CrawlError::Scheduler(message),
        }
    }
}
