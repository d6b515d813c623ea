use serde::{Deserialize, Serialize};

use crate::args::{DataArgs, ModuleArgsSummary, RequestArgs};
use crate::error::CrawlError;
use crate::module::ModuleSummary;
use crate::pool::PoolSummary;
use crate::status::Status;

/// Point-in-time view of a scheduler, suitable for logging as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedSummary {
    pub status: Status,
    pub request_args: Option<RequestArgs>,
    pub data_args: Option<DataArgs>,
    pub module_args: Option<ModuleArgsSummary>,
    pub downloaders: Vec<ModuleSummary>,
    pub analyzers: Vec<ModuleSummary>,
    pub pipelines: Vec<ModuleSummary>,
    pub req_buffer_pool: Option<PoolSummary>,
    pub resp_buffer_pool: Option<PoolSummary>,
    pub item_buffer_pool: Option<PoolSummary>,
    pub error_buffer_pool: Option<PoolSummary>,
    pub url_count: usize,
}

impl SchedSummary {
    pub fn same(&self, other: &SchedSummary) -> bool {
        self == other
    }

    pub fn to_json_pretty(&self) -> Result<String, CrawlError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CrawlError::Other(format!("cannot serialize summary: {e}")))
    }
}
