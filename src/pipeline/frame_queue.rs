//! FIFO queue of frame units shared between two stages
//!
//! Depth is bounded by a companion [`CountingPermit`](super::CountingPermit)
//! held by the producer; the queue itself only orders and hands over units.
//! Consumers block on a condition variable that every push signals, so an
//! empty queue costs no polling.

use super::frame_unit::FrameUnit;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Queue statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total units pushed
    pub pushed: u64,

    /// Total units popped
    pub popped: u64,

    /// Current queue depth
    pub current_depth: usize,

    /// Maximum queue depth reached
    pub max_depth: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    units: VecDeque<FrameUnit>,
    closed: bool,
    stats: QueueStats,
}

/// Thread-safe FIFO of [`FrameUnit`]s
#[derive(Debug, Default)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl FrameQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit and wake one waiting consumer.
    ///
    /// A closed queue drops the unit and returns it to the caller.
    pub fn push(&self, unit: FrameUnit) -> Result<(), FrameUnit> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(unit);
        }

        state.units.push_back(unit);
        state.stats.pushed += 1;
        state.stats.current_depth = state.units.len();
        state.stats.max_depth = state.stats.max_depth.max(state.units.len());
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until a unit is available and remove it.
    ///
    /// Returns `None` once the queue is closed; units still queued at that
    /// point are abandoned with the run.
    pub fn pop(&self) -> Option<FrameUnit> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(unit) = state.units.pop_front() {
                state.stats.popped += 1;
                state.stats.current_depth = state.units.len();
                return Some(unit);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Remove the front unit without blocking
    pub fn try_pop(&self) -> Option<FrameUnit> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let unit = state.units.pop_front()?;
        state.stats.popped += 1;
        state.stats.current_depth = state.units.len();
        Some(unit)
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.state.lock().units.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().units.is_empty()
    }

    /// Reject further pushes and wake every blocked consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_frame_queue_fifo() {
        let queue = FrameQueue::new();
        assert!(queue.is_empty());

        for ts in 0..3 {
            queue.push(FrameUnit::new(vec![ts as u8], ts)).unwrap();
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop().unwrap().timestamp(), 0);
        assert_eq!(queue.pop().unwrap().timestamp(), 1);
        assert_eq!(queue.try_pop().unwrap().timestamp(), 2);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = Arc::new(FrameQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop().map(|unit| unit.timestamp()))
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(FrameUnit::new(vec![1], 42)).unwrap();

        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_close_releases_consumer() {
        let queue = Arc::new(FrameQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert!(consumer.join().unwrap().is_none());
        assert!(queue.push(FrameUnit::end_of_stream(0)).is_err());
    }

    #[test]
    fn test_stats_track_peak_depth() {
        let queue = FrameQueue::new();
        queue.push(FrameUnit::new(vec![0], 0)).unwrap();
        queue.push(FrameUnit::new(vec![0], 1)).unwrap();
        queue.pop();
        queue.push(FrameUnit::new(vec![0], 2)).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.pushed, 3);
        assert_eq!(stats.popped, 1);
        assert_eq!(stats.current_depth, 2);
        assert_eq!(stats.max_depth, 2);
    }
}
