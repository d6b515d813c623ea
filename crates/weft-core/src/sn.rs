use std::sync::{PoisonError, RwLock};

/// Thread-safe serial number source that wraps back to `start` after
/// handing out `max`.
#[derive(Debug)]
pub struct SerialNumberGenerator {
    start: u64,
    max: u64,
    state: RwLock<SnState>,
}

#[derive(Debug, Clone, Copy)]
struct SnState {
    next: u64,
    cycle_count: u64,
}

impl SerialNumberGenerator {
    /// Creates a generator over `start..=max`. A `max` of zero means
    /// `u64::MAX`.
    pub fn new(start: u64, max: u64) -> Self {
        let max = if max == 0 { u64::MAX } else { max };
        Self {
            start,
            max,
            state: RwLock::new(SnState {
                next: start,
                cycle_count: 0,
            }),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Value the next call to [`get`](Self::get) will return.
    pub fn peek_next(&self) -> u64 {
        self.read().next
    }

    /// How many times the sequence has wrapped.
    pub fn cycle_count(&self) -> u64 {
        self.read().cycle_count
    }

    /// Returns the current value and advances the sequence.
    pub fn get(&self) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let current = state.next;
        if current == self.max {
            state.next = self.start;
            state.cycle_count = state.cycle_count.wrapping_add(1);
        } else {
            state.next = current + 1;
        }
        current
    }

    fn read(&self) -> SnState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SerialNumberGenerator {
    fn default() -> Self {
        Self::new(1, 0)
    }
}
