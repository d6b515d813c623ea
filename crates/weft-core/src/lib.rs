pub mod args;
pub mod buffer;
pub mod data;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod mid;
pub mod module;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod sn;
pub mod status;
pub mod summary;

#[cfg(test)]
mod testutil;

pub use args::{DataArgs, ModuleArgs, ModuleArgsSummary, RequestArgs};
pub use buffer::Buffer;
pub use data::{Data, Item, Request, Response};
pub use dispatch::{DispatchEvent, DispatchReporter, IgnoreReason, TracingDispatchReporter};
pub use error::{BufferError, CrawlError, ErrorKind};
pub use mid::{ComponentId, Kind, ModuleAddr};
pub use module::{
    Analyzer, Counts, Downloader, Module, ModuleBase, ModuleSummary, ParseResponse, Pipeline,
    ProcessItem, ScoreCalculator, Worker,
};
pub use pool::{BufferPool, PoolSummary};
pub use registry::Registry;
pub use scheduler::Scheduler;
pub use sn::SerialNumberGenerator;
pub use status::Status;
pub use summary::SchedSummary;
