//! Counting permit used to bound frames in flight at a stage boundary.

use parking_lot::{Condvar, Mutex};

/// Returned by [`CountingPermit::acquire`] once the permit has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitClosed;

#[derive(Debug)]
struct PermitState {
    count: usize,
    closed: bool,
}

/// Blocking counting semaphore.
///
/// `acquire` waits until a unit is available and consumes it; `release`
/// returns one unit and wakes one waiter. Closing the permit wakes every
/// waiter and makes all further acquires fail, which is how an aborted run
/// unblocks its stages.
#[derive(Debug)]
pub struct CountingPermit {
    state: Mutex<PermitState>,
    available: Condvar,
}

impl CountingPermit {
    /// Create a permit pre-seeded with `capacity` units
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PermitState {
                count: capacity,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Block until a unit is available, then consume it.
    pub fn acquire(&self) -> Result<(), PermitClosed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PermitClosed);
            }
            if state.count > 0 {
                state.count -= 1;
                return Ok(());
            }
            self.available.wait(&mut state);
        }
    }

    /// Make one unit available and wake at most one waiter
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.count += 1;
        drop(state);
        self.available.notify_one();
    }

    /// Non-blocking snapshot of the available units
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Fail all current and future acquires
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}
