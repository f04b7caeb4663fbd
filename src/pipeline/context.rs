//! Shared state of one pipeline run
//!
//! Every stage receives the same `Arc<PipelineContext>`. It owns the two
//! queues, the three permits, the progress counters and completion flags,
//! and the slot for the first fatal error. A fresh context is built for
//! every run, so concurrent runs never share anything.

use super::frame_queue::FrameQueue;
use super::semaphore::CountingPermit;
use crate::utils::config::PipelineConfig;
use crate::utils::error::PipelineError;
use log::error;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counters and one-shot completion flags.
///
/// Each counter has exactly one writing stage.
#[derive(Debug, Default)]
pub struct PipelineProgress {
    /// Frames accepted by the source stage
    pub loaded: AtomicU64,

    /// Packets dropped because reformatting failed
    pub dropped: AtomicU64,

    /// Frames accepted by the device
    pub submitted: AtomicU64,

    /// Rejected submission attempts that were retried
    pub submit_retries: AtomicU64,

    /// Submitted frames the device has finished with
    pub retired: AtomicU64,

    /// Pictures delivered by the device
    pub decoded: AtomicU64,

    /// Bytes completed by the device
    pub decoded_bytes: AtomicU64,

    /// Completions whose timestamp did not follow the previous one
    pub out_of_order: AtomicU64,

    /// Frames written by the sink
    pub written: AtomicU64,

    /// Bytes written by the sink
    pub written_bytes: AtomicU64,

    /// Source pushed its sentinel
    pub load_completed: AtomicBool,

    /// Submission stage handed end-of-stream to the device
    pub submit_completed: AtomicBool,

    /// Device delivered its end-of-stream completion
    pub callback_completed: AtomicBool,

    /// Sink consumed the final sentinel
    pub decode_completed: AtomicBool,
}

impl PipelineProgress {
    /// Bump a counter by one
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Add `amount` to a counter
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::AcqRel);
    }

    /// Raise a completion flag
    pub fn finish(flag: &AtomicBool) {
        flag.store(true, Ordering::Release);
    }

    /// Read a counter
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Acquire)
    }

    /// Read a flag
    pub fn is_set(flag: &AtomicBool) -> bool {
        flag.load(Ordering::Acquire)
    }
}

/// Final (or intermediate) snapshot of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub loaded: u64,
    pub dropped: u64,
    pub submitted: u64,
    pub submit_retries: u64,
    pub retired: u64,
    pub decoded: u64,
    pub decoded_bytes: u64,
    pub out_of_order: u64,
    pub written: u64,
    pub written_bytes: u64,
    pub input_queue_peak: usize,
    pub output_queue_peak: usize,
    pub load_completed: bool,
    pub submit_completed: bool,
    pub callback_completed: bool,
    pub decode_completed: bool,
}

impl RunReport {
    /// Check that every completion flag is raised
    pub fn all_completed(&self) -> bool {
        self.load_completed && self.submit_completed && self.callback_completed && self.decode_completed
    }
}

/// Queues, permits and progress shared by all stages of one run
#[derive(Debug)]
pub struct PipelineContext {
    /// Compressed frames waiting for submission
    pub input_queue: FrameQueue,

    /// Decoded frames waiting to be written
    pub output_queue: FrameQueue,

    /// Bounds loaded-but-unsubmitted frames
    pub input_cache: CountingPermit,

    /// Bounds decoded-but-unwritten frames
    pub output_cache: CountingPermit,

    /// Bounds frames resident inside the device
    pub hardware_slots: CountingPermit,

    /// Counters and flags
    pub progress: PipelineProgress,

    aborted: AtomicBool,
    failure: Mutex<Option<PipelineError>>,
}

impl PipelineContext {
    /// Build a fresh context with permits seeded from the configuration
    pub fn new(config: &PipelineConfig) -> Arc<Self> {
        Arc::new(Self {
            input_queue: FrameQueue::new(),
            output_queue: FrameQueue::new(),
            input_cache: CountingPermit::new(config.input_cache_frames),
            output_cache: CountingPermit::new(config.output_cache_frames),
            hardware_slots: CountingPermit::new(config.hardware_buffer_slots),
            progress: PipelineProgress::default(),
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
        })
    }

    /// Record a fatal error and tear the run down.
    ///
    /// Only the first error is kept. Closing the queues and permits wakes
    /// every blocked stage and the completion callback so they can exit.
    pub fn abort(&self, err: PipelineError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                error!("Pipeline aborted: {}", err);
                *failure = Some(err);
            }
        }
        self.aborted.store(true, Ordering::Release);

        self.input_queue.close();
        self.output_queue.close();
        self.input_cache.close();
        self.output_cache.close();
        self.hardware_slots.close();
    }

    /// Check if the run has been aborted
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Take the recorded fatal error, if any
    pub fn take_failure(&self) -> Option<PipelineError> {
        self.failure.lock().take()
    }

    /// Check if the sink consumed the final sentinel
    pub fn is_decode_completed(&self) -> bool {
        PipelineProgress::is_set(&self.progress.decode_completed)
    }

    /// Snapshot counters, flags and queue peaks
    pub fn report(&self) -> RunReport {
        let p = &self.progress;
        RunReport {
            loaded: PipelineProgress::get(&p.loaded),
            dropped: PipelineProgress::get(&p.dropped),
            submitted: PipelineProgress::get(&p.submitted),
            submit_retries: PipelineProgress::get(&p.submit_retries),
            retired: PipelineProgress::get(&p.retired),
            decoded: PipelineProgress::get(&p.decoded),
            decoded_bytes: PipelineProgress::get(&p.decoded_bytes),
            out_of_order: PipelineProgress::get(&p.out_of_order),
            written: PipelineProgress::get(&p.written),
            written_bytes: PipelineProgress::get(&p.written_bytes),
            input_queue_peak: self.input_queue.stats().max_depth,
            output_queue_peak: self.output_queue.stats().max_depth,
            load_completed: PipelineProgress::is_set(&p.load_completed),
            submit_completed: PipelineProgress::is_set(&p.submit_completed),
            callback_completed: PipelineProgress::is_set(&p.callback_completed),
            decode_completed: PipelineProgress::is_set(&p.decode_completed),
        }
    }
}
