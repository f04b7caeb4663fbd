//! Completion callback: decoder output to the output queue

use super::context::{PipelineContext, PipelineProgress};
use super::frame_unit::FrameUnit;
use crate::decoder::{BufferFlag, CompletionHandler, DecodedOutput, OutputPool};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Runs on the device's thread for every completion.
///
/// Copies the payload out, hands the buffer straight back to the device,
/// frees the retired unit's hardware slot, then waits for room in the output
/// cache. Units the device consumed without a picture only free their slot.
pub struct CompletionStage {
    context: Arc<PipelineContext>,
    verify_order: bool,
    last_timestamp: Mutex<Option<u64>>,
}

impl CompletionStage {
    /// Create the handler
    pub fn new(context: Arc<PipelineContext>, verify_order: bool) -> Self {
        Self {
            context,
            verify_order,
            last_timestamp: Mutex::new(None),
        }
    }

    fn check_order(&self, timestamp: u64) {
        let mut last = self.last_timestamp.lock();
        if let Some(previous) = *last {
            if timestamp <= previous {
                PipelineProgress::bump(&self.context.progress.out_of_order);
                warn!(
                    "Completion for frame {} arrived after frame {}",
                    timestamp, previous
                );
            }
        }
        *last = Some(timestamp);
    }

    fn retire(&self) {
        self.context.hardware_slots.release();
        PipelineProgress::bump(&self.context.progress.retired);
    }
}

impl CompletionHandler for CompletionStage {
    fn on_output(&self, pool: &OutputPool, output: DecodedOutput<'_>) {
        let progress = &self.context.progress;

        let mut unit = match output.flag {
            BufferFlag::EndOfStream => FrameUnit::end_of_stream(output.timestamp),
            BufferFlag::EndOfFrame => FrameUnit::copy_from(output.data, output.timestamp),
        };
        if let Some(buffer) = output.buffer {
            pool.return_output(buffer);
        }
        unit.mark_handled();

        if unit.is_end_of_stream() {
            self.context.hardware_slots.release();
            PipelineProgress::finish(&progress.callback_completed);
            info!(
                "Decoder signalled end of stream: {} frames decoded",
                PipelineProgress::get(&progress.decoded)
            );
        } else {
            if output.retires_unit {
                self.retire();
            }
            if self.verify_order {
                self.check_order(unit.timestamp());
            }
            let decoded = PipelineProgress::bump(&progress.decoded);
            PipelineProgress::add(&progress.decoded_bytes, unit.len() as u64);
            debug!(
                "Decoded frame {} ({} bytes), {} decoded",
                unit.timestamp(),
                unit.len(),
                decoded
            );
        }

        // Blocks while the sink is behind; a closed permit means the run is over
        if self.context.output_cache.acquire().is_err() {
            debug!("Run aborted, discarding frame {}", unit.timestamp());
            return;
        }
        if let Err(unit) = self.context.output_queue.push(unit) {
            debug!("Run aborted, discarding frame {}", unit.timestamp());
        }
    }

    fn on_consumed(&self, timestamp: u64) {
        self.retire();
        debug!("Frame {} consumed without a picture", timestamp);
    }
}
