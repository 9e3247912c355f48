//! Thread-safe sequence counter for frame numbering and payload ids.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64` internally, so several tasks can call
//! [`SequenceCounter::next`] at once without a lock and without ever
//! receiving the same value twice.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter.
///
/// Values start at 0 and wrap from `u64::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use localsignal_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.  Usable in `static` items.
    pub const fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next value and atomically increments the counter.
    ///
    /// `Relaxed` ordering: the values order frames, they do not publish memory.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without incrementing.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_zero() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_sequence_counter_wraps_at_u64_max() {
        // Arrange – start the counter one step before overflow
        let counter = SequenceCounter {
            inner: AtomicU64::new(u64::MAX),
        };

        // Act
        let before_wrap = counter.next();
        let after_wrap = counter.next();

        // Assert
        assert_eq!(before_wrap, u64::MAX);
        assert_eq!(after_wrap, 0, "counter must wrap to 0 after u64::MAX");
    }

    #[test]
    fn test_sequence_counter_is_thread_safe() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());
        let thread_count = 8;
        let increments_per_thread = 1000;

        // Act – increment from many threads simultaneously
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    (0..increments_per_thread)
                        .map(|_| c.next())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all_values: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert – no two threads got the same value
        all_values.sort_unstable();
        all_values.dedup();
        assert_eq!(all_values.len(), thread_count * increments_per_thread);
    }

    #[test]
    fn test_current_does_not_increment() {
        let counter = SequenceCounter::new();
        counter.next();

        let current = counter.current();
        let next = counter.next();

        assert_eq!(current, 1);
        assert_eq!(next, 1);
    }
}
