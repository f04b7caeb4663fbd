//! Loopback decoder device
//!
//! Behaves like an asynchronous hardware decoder with `buffer_count`
//! internal slots: submissions are queued to a worker thread, and each one
//! comes back through the completion callback with its payload unchanged.
//! Used for pipeline runs without decode hardware and throughout the tests.

use super::{
    BufferFlag, CompletionHandler, DecodedOutput, DecoderBackend, HardwareDecoder, OutputPool,
    SessionParams, SubmitError,
};
use crate::utils::error::{PipelineError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A buffer accepted by the device
struct Job {
    data: Vec<u8>,
    timestamp: u64,
    flag: BufferFlag,
}

/// Opens loopback sessions
#[derive(Debug, Clone, Default)]
pub struct LoopbackBackend {
    latency: Duration,
}

impl LoopbackBackend {
    /// Create a backend whose sessions wait `latency` per unit
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl DecoderBackend for LoopbackBackend {
    fn create_session(
        &self,
        params: &SessionParams,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<Arc<dyn HardwareDecoder>> {
        let decoder = LoopbackDecoder::open(params, handler, self.latency)?;
        Ok(Arc::new(decoder))
    }
}

/// An open loopback session
pub struct LoopbackDecoder {
    name: String,
    input: Option<Sender<Job>>,
    pool: Arc<OutputPool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl LoopbackDecoder {
    /// Open a session and start its worker
    pub fn open(
        params: &SessionParams,
        handler: Arc<dyn CompletionHandler>,
        latency: Duration,
    ) -> Result<Self> {
        if params.buffer_count == 0 {
            return Err(PipelineError::SessionCreate(format!(
                "{}: buffer count must be non-zero",
                params.device_node
            )));
        }

        let (input, jobs) = bounded(params.buffer_count);
        let pool = Arc::new(OutputPool::new(params.buffer_count));

        let worker = {
            let pool = Arc::clone(&pool);
            thread::Builder::new()
                .name("loopback-dec".to_string())
                .spawn(move || run_worker(jobs, pool, handler, latency))
                .map_err(|e| {
                    PipelineError::SessionCreate(format!("{}: {}", params.device_node, e))
                })?
        };

        let name = format!("loopback:{}", params.device_node);
        info!(
            "Opened {} ({:?} {}x{}, {} buffers)",
            name, params.role, params.width, params.height, params.buffer_count
        );

        Ok(Self {
            name,
            input: Some(input),
            pool,
            worker: Some(worker),
        })
    }
}

impl HardwareDecoder for LoopbackDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, data: &[u8], timestamp: u64, flag: BufferFlag) -> std::result::Result<(), SubmitError> {
        let input = self.input.as_ref().ok_or(SubmitError::Closed)?;
        let job = Job {
            data: data.to_vec(),
            timestamp,
            flag,
        };

        input.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Busy,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }
}

impl Drop for LoopbackDecoder {
    fn drop(&mut self) {
        self.input.take();
        self.pool.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!("Destroyed {}", self.name);
    }
}

fn run_worker(
    jobs: Receiver<Job>,
    pool: Arc<OutputPool>,
    handler: Arc<dyn CompletionHandler>,
    latency: Duration,
) {
    debug!("Loopback worker started");

    while let Ok(job) = jobs.recv() {
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        match job.flag {
            BufferFlag::EndOfFrame => {
                let Some(mut buffer) = pool.checkout() else {
                    break;
                };
                buffer.data.clear();
                buffer.data.extend_from_slice(&job.data);

                handler.on_output(
                    &pool,
                    DecodedOutput {
                        buffer: Some(buffer.id),
                        data: &buffer.data,
                        timestamp: job.timestamp,
                        flag: BufferFlag::EndOfFrame,
                        retires_unit: true,
                    },
                );
                pool.restore(buffer);
            }
            BufferFlag::EndOfStream => {
                handler.on_output(
                    &pool,
                    DecodedOutput {
                        buffer: None,
                        data: &[],
                        timestamp: job.timestamp,
                        flag: BufferFlag::EndOfStream,
                        retires_unit: true,
                    },
                );
            }
        }
    }

    debug!("Loopback worker finished");
}
