//! Elastic pool of bounded buffers.
//!
//! A pool starts with a single buffer and grows one buffer at a time, up
//! to `max_buffers`, only when every existing buffer is full. Buffers that
//! drain empty are reclaimed as long as at least one remains.
//!
//! `put` and `get` never wait. Consumers that want to park until data shows
//! up use [`BufferPool::recv`], which wakes on every successful `put` and on
//! `close`.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::buffer::Buffer;
use crate::error::{BufferError, CrawlError};

/// Point-in-time sizing of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub buffer_cap: usize,
    pub max_buffers: usize,
    pub buffer_number: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct BufferPool<T> {
    buffer_cap: NonZeroUsize,
    max_buffers: usize,
    buffers: RwLock<Vec<Buffer<T>>>,
    total: AtomicUsize,
    closed: AtomicBool,
    available: Notify,
}

impl<T> BufferPool<T> {
    pub fn new(buffer_cap: usize, max_buffers: usize) -> Result<Self, CrawlError> {
        let buffer_cap = NonZeroUsize::new(buffer_cap).ok_or_else(|| {
            CrawlError::InvalidParameter("pool buffer capacity must be positive".into())
        })?;
        if max_buffers == 0 {
            return Err(CrawlError::InvalidParameter(
                "pool must allow at least one buffer".into(),
            ));
        }
        Ok(Self {
            buffer_cap,
            max_buffers,
            buffers: RwLock::new(vec![Buffer::with_capacity(buffer_cap)]),
            total: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            available: Notify::new(),
        })
    }

    /// Queues a datum without waiting.
    ///
    /// Fails with [`BufferError::PoolSaturated`] when every buffer is full
    /// and the pool already holds `max_buffers` of them.
    pub fn put(&self, datum: T) -> Result<(), BufferError> {
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        // Counted before it becomes visible so a racing `get` cannot
        // decrement past zero.
        self.total.fetch_add(1, Ordering::AcqRel);
        let result = self.place(datum);
        match result {
            Ok(()) => self.available.notify_one(),
            Err(_) => self.decr_total(),
        }
        result
    }

    /// `close` zeroes the count while producers and consumers may still be
    /// mid-flight, so it never drops below zero.
    fn decr_total(&self) {
        let _ = self
            .total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn place(&self, datum: T) -> Result<(), BufferError> {
        let datum = {
            let buffers = self.read();
            match Self::offer_any(&buffers, datum) {
                Ok(()) => return Ok(()),
                Err(datum) => datum,
            }
        };

        let mut buffers = self.write();
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        // Another producer may have grown the pool or a consumer drained a
        // buffer while the lock was released.
        let datum = match Self::offer_any(&buffers, datum) {
            Ok(()) => return Ok(()),
            Err(datum) => datum,
        };
        if buffers.len() >= self.max_buffers {
            return Err(BufferError::PoolSaturated);
        }
        let buffer = Buffer::with_capacity(self.buffer_cap);
        buffer.offer(datum).map_err(|(err, _)| err)?;
        buffers.push(buffer);
        tracing::trace!(buffers = buffers.len(), "Buffer pool grew");
        Ok(())
    }

    fn offer_any(buffers: &[Buffer<T>], mut datum: T) -> Result<(), T> {
        for buffer in buffers {
            match buffer.offer(datum) {
                Ok(()) => return Ok(()),
                Err((_, back)) => datum = back,
            }
        }
        Err(datum)
    }

    /// Takes the oldest datum of the first non-empty buffer without waiting.
    pub fn get(&self) -> Result<T, BufferError> {
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        let (datum, drained) = {
            let buffers = self.read();
            let mut found = None;
            for buffer in buffers.iter() {
                if let Ok(datum) = buffer.get() {
                    let drained = buffers.len() > 1 && buffer.is_empty().unwrap_or(false);
                    found = Some((datum, drained));
                    break;
                }
            }
            found.ok_or(if self.is_closed() {
                BufferError::Closed
            } else {
                BufferError::Empty
            })?
        };
        self.decr_total();
        if drained {
            self.reclaim();
        }
        Ok(datum)
    }

    /// Drops empty buffers while more than one is live.
    fn reclaim(&self) {
        let mut buffers = self.write();
        let mut i = 0;
        while buffers.len() > 1 && i < buffers.len() {
            if buffers[i].is_empty().unwrap_or(true) {
                let buffer = buffers.remove(i);
                let _ = buffer.close();
            } else {
                i += 1;
            }
        }
    }

    /// Waits until a datum is available, or the pool closes.
    pub async fn recv(&self) -> Result<T, BufferError> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a `put` in between is not missed.
            notified.as_mut().enable();
            match self.get() {
                Err(BufferError::Empty) => notified.await,
                other => return other,
            }
        }
    }

    /// Closes the pool and every buffer in it. Returns `false` if it was
    /// already closed.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        {
            let buffers = self.write();
            for buffer in buffers.iter() {
                let _ = buffer.close();
            }
        }
        self.total.store(0, Ordering::Release);
        self.available.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of data currently queued across all buffers.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn buffer_number(&self) -> usize {
        self.read().len()
    }

    pub fn buffer_cap(&self) -> usize {
        self.buffer_cap.get()
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            buffer_cap: self.buffer_cap(),
            max_buffers: self.max_buffers,
            buffer_number: self.buffer_number(),
            total: self.total(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Buffer<T>>> {
        self.buffers.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned buffer pool lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Buffer<T>>> {
        self.buffers.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned buffer pool lock");
            poisoned.into_inner()
        })
    }
}
