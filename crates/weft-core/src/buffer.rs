use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{BufferError, CrawlError};

/// Fixed-capacity FIFO queue. Never blocks; closing discards its contents.
#[derive(Debug)]
pub struct Buffer<T> {
    cap: usize,
    queue: Mutex<VecDeque<T>>,
    closed: AtomicBool,
}

impl<T> Buffer<T> {
    pub fn new(cap: usize) -> Result<Self, CrawlError> {
        let cap = NonZeroUsize::new(cap).ok_or_else(|| {
            CrawlError::InvalidParameter("buffer capacity must be positive".into())
        })?;
        Ok(Self::with_capacity(cap))
    }

    pub(crate) fn with_capacity(cap: NonZeroUsize) -> Self {
        Self {
            cap: cap.get(),
            queue: Mutex::new(VecDeque::with_capacity(cap.get())),
            closed: AtomicBool::new(false),
        }
    }

    pub fn put(&self, datum: T) -> Result<(), BufferError> {
        self.offer(datum).map_err(|(err, _)| err)
    }

    /// Like [`put`](Self::put) but hands the datum back on failure.
    pub(crate) fn offer(&self, datum: T) -> Result<(), (BufferError, T)> {
        let mut queue = self.lock();
        if self.is_closed() {
            return Err((BufferError::Closed, datum));
        }
        if queue.len() >= self.cap {
            return Err((BufferError::Full, datum));
        }
        queue.push_back(datum);
        Ok(())
    }

    pub fn get(&self) -> Result<T, BufferError> {
        let mut queue = self.lock();
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        queue.pop_front().ok_or(BufferError::Empty)
    }

    pub fn len(&self) -> Result<usize, BufferError> {
        let queue = self.lock();
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        Ok(queue.len())
    }

    pub fn is_empty(&self) -> Result<bool, BufferError> {
        self.len().map(|n| n == 0)
    }

    pub fn cap(&self) -> Result<usize, BufferError> {
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        Ok(self.cap)
    }

    /// Closes the buffer and drops anything still queued.
    pub fn close(&self) -> Result<(), BufferError> {
        let mut queue = self.lock();
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BufferError::AlreadyClosed);
        }
        queue.clear();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned buffer lock");
            poisoned.into_inner()
        })
    }
}
