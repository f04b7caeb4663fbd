//! Integration test utilities for hwdec-pipe
//!
//! - Temporary output directories
//! - Synthetic frame payloads
//! - A scripted decoder device that can jitter, reject, swallow or split
//!   frames, or fail to open, and records how many units it held at once

use anyhow::Result;
use hwdec_pipe::decoder::{
    BufferFlag, CompletionHandler, DecodedOutput, DecoderBackend, HardwareDecoder, OutputPool,
    SessionParams, SubmitError,
};
use hwdec_pipe::demux::{BitstreamReformatter, Packet};
use hwdec_pipe::PipelineError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Test fixture owning a temporary directory for output files
pub struct TestFixture {
    pub temp_dir: TempDir,
}

impl TestFixture {
    /// Create a new fixture
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    /// Get the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path for an output file inside the fixture directory
    pub fn output(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

/// `count` distinguishable payloads of varying length, tagged with `seed`
pub fn frames(count: usize, seed: u8) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let mut payload = vec![seed, i as u8];
            payload.extend(std::iter::repeat(i as u8 ^ seed).take(i % 7));
            payload
        })
        .collect()
}

/// Reformatter that rejects the packet at the given 1-based position
pub struct FailingReformatter {
    fail_at: usize,
    seen: usize,
}

impl FailingReformatter {
    pub fn failing_at(fail_at: usize) -> Self {
        Self { fail_at, seen: 0 }
    }
}

impl BitstreamReformatter for FailingReformatter {
    fn reformat(&mut self, packet: Packet) -> hwdec_pipe::Result<Packet> {
        self.seen += 1;
        if self.seen == self.fail_at {
            return Err(PipelineError::reformat_error("truncated NAL unit"));
        }
        Ok(packet)
    }
}

/// How the scripted device behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Accept everything; delay each completion by a timestamp-derived jitter
    Jitter,

    /// Reject every submission as busy
    AlwaysBusy,

    /// Consume odd-numbered frames without producing a picture
    Coalesce,

    /// Produce two pictures for every frame
    Split,

    /// Fail session creation
    FailOpen,
}

/// Counters shared between a scripted backend and the test
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl DeviceStats {
    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Backend opening [`ScriptedDevice`] sessions
pub struct ScriptedBackend {
    behaviour: Behaviour,
    min_in_flight: usize,
    pub stats: Arc<DeviceStats>,
}

impl ScriptedBackend {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            min_in_flight: 1,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    /// Report a larger reorder depth from the opened sessions
    pub fn with_min_in_flight(mut self, units: usize) -> Self {
        self.min_in_flight = units;
        self
    }
}

impl DecoderBackend for ScriptedBackend {
    fn create_session(
        &self,
        params: &SessionParams,
        handler: Arc<dyn CompletionHandler>,
    ) -> hwdec_pipe::Result<Arc<dyn HardwareDecoder>> {
        if self.behaviour == Behaviour::FailOpen {
            return Err(PipelineError::SessionCreate(params.device_node.clone()));
        }

        let (tx, rx) = mpsc::channel::<(Vec<u8>, u64, BufferFlag)>();
        let pool = Arc::new(OutputPool::new(params.buffer_count));
        let worker = {
            let pool = Arc::clone(&pool);
            let stats = Arc::clone(&self.stats);
            let behaviour = self.behaviour;
            thread::spawn(move || {
                for (data, timestamp, flag) in rx {
                    thread::sleep(Duration::from_micros((timestamp * 37) % 400));
                    stats.in_flight.fetch_sub(1, Ordering::SeqCst);

                    if flag == BufferFlag::EndOfStream {
                        handler.on_output(
                            &pool,
                            DecodedOutput {
                                buffer: None,
                                data: &[],
                                timestamp,
                                flag,
                                retires_unit: true,
                            },
                        );
                        continue;
                    }

                    let pictures = match behaviour {
                        Behaviour::Coalesce if timestamp % 2 == 1 => 0,
                        Behaviour::Split => 2,
                        _ => 1,
                    };
                    if pictures == 0 {
                        handler.on_consumed(timestamp);
                        continue;
                    }

                    for picture in 0..pictures {
                        let Some(mut buffer) = pool.checkout() else {
                            return;
                        };
                        buffer.data.clear();
                        buffer.data.extend_from_slice(&data);
                        handler.on_output(
                            &pool,
                            DecodedOutput {
                                buffer: Some(buffer.id),
                                data: &buffer.data,
                                timestamp,
                                flag,
                                retires_unit: picture == 0,
                            },
                        );
                        pool.restore(buffer);
                    }
                }
            })
        };

        Ok(Arc::new(ScriptedDevice {
            behaviour: self.behaviour,
            min_in_flight: self.min_in_flight,
            stats: Arc::clone(&self.stats),
            input: Mutex::new(Some(tx)),
            pool,
            worker: Mutex::new(Some(worker)),
        }))
    }
}

/// Session of the scripted device
pub struct ScriptedDevice {
    behaviour: Behaviour,
    min_in_flight: usize,
    stats: Arc<DeviceStats>,
    input: Mutex<Option<mpsc::Sender<(Vec<u8>, u64, BufferFlag)>>>,
    pool: Arc<OutputPool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HardwareDecoder for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted"
    }

    fn submit(&self, data: &[u8], timestamp: u64, flag: BufferFlag) -> Result<(), SubmitError> {
        if self.behaviour == Behaviour::AlwaysBusy {
            self.stats.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(SubmitError::Busy);
        }

        let input = self.input.lock();
        let tx = input.as_ref().ok_or(SubmitError::Closed)?;

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.stats.accepted.fetch_add(1, Ordering::SeqCst);

        tx.send((data.to_vec(), timestamp, flag))
            .map_err(|_| SubmitError::Closed)
    }

    fn min_in_flight(&self) -> usize {
        self.min_in_flight
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.input.lock().take();
        self.pool.close();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
