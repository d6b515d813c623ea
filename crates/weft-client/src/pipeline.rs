use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use weft_core::{ComponentId, CrawlError, Item, Kind, Module, ModuleBase, Pipeline, ProcessItem};

/// Pipeline that passes each item through a chain of processors.
///
/// Each processor receives the previous one's output. A failing processor
/// leaves the item unchanged for the next one, unless fail-fast is set, in
/// which case processing of that item ends at the first error.
pub struct ProcessorPipeline {
    base: ModuleBase,
    processors: Vec<ProcessItem>,
    fail_fast: AtomicBool,
}

impl ProcessorPipeline {
    pub fn new(id: ComponentId, processors: Vec<ProcessItem>) -> Result<Self, CrawlError> {
        if id.kind() != Kind::Pipeline {
            return Err(CrawlError::InvalidParameter(format!(
                "{id} is not a pipeline id"
            )));
        }
        if processors.is_empty() {
            return Err(CrawlError::InvalidParameter(
                "pipeline needs at least one item processor".into(),
            ));
        }
        Ok(Self {
            base: ModuleBase::new(id, None),
            processors,
            fail_fast: AtomicBool::new(false),
        })
    }

    pub fn with_fail_fast(self, fail_fast: bool) -> Self {
        self.set_fail_fast(fail_fast);
        self
    }
}

impl Module for ProcessorPipeline {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Pipeline for ProcessorPipeline {
    fn item_processors(&self) -> &[ProcessItem] {
        &self.processors
    }

    async fn send(&self, item: Item) -> Vec<CrawlError> {
        let _guard = self.base.begin();
        if !item.is_valid() {
            return vec![CrawlError::InvalidParameter("item is invalid".into())];
        }
        self.base.incr_accepted();

        let fail_fast = self.fail_fast();
        let mut current = item;
        let mut errors = Vec::new();
        for (index, process) in self.processors.iter().enumerate() {
            match process(current.clone()) {
                Ok(next) => current = next,
                Err(err) => {
                    tracing::debug!(
                        id = %self.base.id(),
                        index,
                        error = %err,
                        "Item processor failed"
                    );
                    errors.push(err);
                    if fail_fast {
                        break;
                    }
                }
            }
        }
        if errors.is_empty() {
            self.base.incr_completed();
        }
        errors
    }

    fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Acquire)
    }

    fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// JSON Lines output
// ---------------------------------------------------------------------------

/// Appends every item it sees to a file, one JSON object per line.
pub struct JsonLinesWriter {
    out: Mutex<BufWriter<File>>,
    written: AtomicU64,
}

impl JsonLinesWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Arc<Self>, CrawlError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                CrawlError::Pipeline(format!("cannot open {}: {e}", path.display()))
            })?;
        Ok(Arc::new(Self {
            out: Mutex::new(BufWriter::new(file)),
            written: AtomicU64::new(0),
        }))
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Writes `item` and flushes, so a crash loses at most one line.
    pub fn write(&self, item: &Item) -> Result<(), CrawlError> {
        let line = serde_json::to_string(item)
            .map_err(|e| CrawlError::Pipeline(format!("cannot serialize item: {e}")))?;
        let mut out = self.out.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned output lock");
            poisoned.into_inner()
        });
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|e| CrawlError::Pipeline(format!("cannot write item: {e}")))?;
        self.written.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Processor that writes the item and passes it on unchanged.
    pub fn processor(self: &Arc<Self>) -> ProcessItem {
        let writer = Arc::clone(self);
        Arc::new(move |item: Item| -> Result<Item, CrawlError> {
            writer.write(&item)?;
            Ok(item)
        })
    }
}
