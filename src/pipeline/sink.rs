//! Sink stage: output queue to storage

use super::context::{PipelineContext, PipelineProgress};
use crate::utils::error::{PipelineError, Result};
use log::{debug, info};
use std::io::Write;
use std::sync::Arc;

/// Writes decoded payloads back to back, in arrival order
pub struct SinkStage<W: Write> {
    context: Arc<PipelineContext>,
    writer: W,
}

impl<W: Write> SinkStage<W> {
    /// Create the stage around an already opened writer
    pub fn new(context: Arc<PipelineContext>, writer: W) -> Self {
        Self { context, writer }
    }

    /// Drain the output queue until the sentinel arrives
    pub fn run(mut self) -> Result<()> {
        info!("Sink stage started");

        loop {
            let unit = self
                .context
                .output_queue
                .pop()
                .ok_or(PipelineError::Aborted)?;
            self.context.output_cache.release();

            if unit.is_end_of_stream() {
                self.writer.flush()?;
                PipelineProgress::finish(&self.context.progress.decode_completed);
                info!(
                    "Sink stage finished: {} frames written",
                    PipelineProgress::get(&self.context.progress.written)
                );
                return Ok(());
            }

            self.writer.write_all(unit.data())?;

            let written = PipelineProgress::bump(&self.context.progress.written);
            PipelineProgress::add(&self.context.progress.written_bytes, unit.len() as u64);
            debug!(
                "Wrote frame {} ({} bytes, handled {}x), {} written",
                unit.timestamp(),
                unit.len(),
                unit.handled(),
                written
            );
        }
    }
}
