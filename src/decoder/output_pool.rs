//! Fixed set of output buffers owned by a decoder device
//!
//! A buffer lent to the completion callback stays unavailable until the
//! callback hands it back with [`OutputPool::return_output`]. When every
//! buffer is out, the device worker waits.

use super::BufferId;
use log::warn;
use parking_lot::{Condvar, Mutex};

/// An output buffer checked out of the pool
#[derive(Debug)]
pub struct OutputBuffer {
    /// Slot index
    pub id: BufferId,

    /// Backing storage
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct Slot {
    storage: Option<Vec<u8>>,
    lent: bool,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    closed: bool,
}

/// Output buffer pool shared between a device worker and its callback
#[derive(Debug)]
pub struct OutputPool {
    state: Mutex<PoolState>,
    available: Condvar,
}

impl OutputPool {
    /// Create a pool of `count` empty buffers
    pub fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|_| Slot {
                storage: Some(Vec::new()),
                lent: false,
            })
            .collect();

        Self {
            state: Mutex::new(PoolState { slots, closed: false }),
            available: Condvar::new(),
        }
    }

    /// Block until a buffer is free and take it.
    ///
    /// Returns `None` once the pool is closed.
    pub fn checkout(&self) -> Option<OutputBuffer> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }

            let free = state
                .slots
                .iter()
                .position(|slot| !slot.lent && slot.storage.is_some());

            if let Some(id) = free {
                let slot = &mut state.slots[id];
                slot.lent = true;
                let data = slot.storage.take().unwrap_or_default();
                return Some(OutputBuffer { id, data });
            }

            self.available.wait(&mut state);
        }
    }

    /// Put a buffer's storage back after the callback ran.
    pub fn restore(&self, buffer: OutputBuffer) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(buffer.id) {
            slot.storage = Some(buffer.data);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Mark a lent buffer as free for the device again
    pub fn return_output(&self, id: BufferId) {
        let mut state = self.state.lock();
        match state.slots.get_mut(id) {
            Some(slot) if slot.lent => slot.lent = false,
            _ => {
                warn!("Output buffer {} returned but was not lent", id);
                return;
            }
        }
        drop(state);
        self.available.notify_one();
    }

    /// Buffers currently available to the device
    pub fn free_count(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| !slot.lent && slot.storage.is_some())
            .count()
    }

    /// Wake waiters and refuse further checkouts
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}
