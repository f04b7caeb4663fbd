//! Submission stage: input queue to decoder device

use super::context::{PipelineContext, PipelineProgress};
use super::frame_unit::FrameUnit;
use crate::decoder::{BufferFlag, HardwareDecoder, SubmitError};
use crate::utils::config::PipelineConfig;
use crate::utils::error::{PipelineError, Result};
use log::{debug, info, trace};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Hands queued units to the device in order
pub struct SubmissionStage {
    context: Arc<PipelineContext>,
    decoder: Arc<dyn HardwareDecoder>,
    retry_limit: u64,
    retry_delay: Duration,
}

impl SubmissionStage {
    /// Create the stage
    pub fn new(
        context: Arc<PipelineContext>,
        decoder: Arc<dyn HardwareDecoder>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            context,
            decoder,
            retry_limit: config.submit_retry_limit,
            retry_delay: config.submit_retry_delay(),
        }
    }

    /// Submit every unit until the sentinel has been handed over
    pub fn run(self) -> Result<()> {
        info!("Submission stage started on {}", self.decoder.name());

        loop {
            // A unit leaves the queue only once a device slot is free
            self.context
                .hardware_slots
                .acquire()
                .map_err(|_| PipelineError::Aborted)?;

            let mut unit = self
                .context
                .input_queue
                .pop()
                .ok_or(PipelineError::Aborted)?;
            unit.mark_handled();

            if unit.is_end_of_stream() {
                self.submit(&unit, BufferFlag::EndOfStream)?;
                PipelineProgress::finish(&self.context.progress.submit_completed);
                info!(
                    "Submission stage finished: {} frames submitted",
                    PipelineProgress::get(&self.context.progress.submitted)
                );
                return Ok(());
            }

            self.context.input_cache.release();
            self.submit(&unit, BufferFlag::EndOfFrame)?;

            let submitted = PipelineProgress::bump(&self.context.progress.submitted);
            debug!(
                "Submitted frame {} ({} bytes), {} submitted",
                unit.timestamp(),
                unit.len(),
                submitted
            );
        }
    }

    /// Retry a rejected submission until the device takes it
    fn submit(&self, unit: &FrameUnit, flag: BufferFlag) -> Result<()> {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match self.decoder.submit(unit.data(), unit.timestamp(), flag) {
                Ok(()) => return Ok(()),
                Err(SubmitError::Closed) => return Err(PipelineError::DeviceClosed),
                Err(SubmitError::Busy) => {
                    if attempts >= self.retry_limit {
                        return Err(PipelineError::SubmitRetriesExhausted {
                            attempts,
                            timestamp: unit.timestamp(),
                        });
                    }
                    if self.context.is_aborted() {
                        return Err(PipelineError::Aborted);
                    }

                    PipelineProgress::bump(&self.context.progress.submit_retries);
                    trace!("Device busy, retrying frame {}", unit.timestamp());
                    if !self.retry_delay.is_zero() {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }
    }
}
