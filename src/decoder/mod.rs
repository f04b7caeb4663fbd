//! Decoder device module for hwdec-pipe
//!
//! The decoder is an opaque device reached through an asynchronous
//! submit/callback contract: buffers are submitted from the pipeline's
//! submission thread, and completions are delivered on a thread the device
//! owns. This module defines that contract and the device back-ends.

mod loopback;
mod output_pool;
mod stream_info;

#[cfg(feature = "ffmpeg")]
mod ffmpeg_device;

pub use loopback::{LoopbackBackend, LoopbackDecoder};
pub use output_pool::{OutputBuffer, OutputPool};
pub use stream_info::{DecoderRole, ReformatKind, StreamInfoExtractor};

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_device::{FfmpegBackend, FfmpegDecoder};

use crate::utils::config::{DecoderBackendKind, DecoderConfig};
use crate::utils::error::Result;
use std::fmt;
use std::sync::Arc;

/// Index of a device-owned output buffer
pub type BufferId = usize;

/// Marks what a submitted or completed buffer represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFlag {
    /// The buffer holds one complete frame
    EndOfFrame,

    /// No more frames follow
    EndOfStream,
}

/// Reasons a device refuses a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Device input is full; retrying later may succeed
    Busy,

    /// Session is gone; retrying is pointless
    Closed,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Busy => write!(f, "device busy"),
            SubmitError::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// One completion delivered by the device
#[derive(Debug)]
pub struct DecodedOutput<'a> {
    /// Output buffer to hand back with [`OutputPool::return_output`];
    /// `None` for the end-of-stream completion
    pub buffer: Option<BufferId>,

    /// Decoded payload, valid only for the duration of the callback
    pub data: &'a [u8],

    /// Timestamp tag the unit was submitted with
    pub timestamp: u64,

    /// Frame or end-of-stream
    pub flag: BufferFlag,

    /// This picture finishes a submitted unit and frees its slot. A unit
    /// that yields several pictures sets it on exactly one of them. The
    /// end-of-stream completion always frees the sentinel's slot.
    pub retires_unit: bool,
}

/// Receives completions on the device's own thread.
///
/// Every accepted submission is retired exactly once: by a picture with
/// `retires_unit` set, by [`on_consumed`](Self::on_consumed), or, for the
/// sentinel, by the end-of-stream completion.
pub trait CompletionHandler: Send + Sync {
    /// Called for every decoded picture and once for end-of-stream
    fn on_output(&self, pool: &OutputPool, output: DecodedOutput<'_>);

    /// Called when a submitted unit was used up without producing a picture
    fn on_consumed(&self, timestamp: u64);
}

/// An open decoder session.
///
/// Dropping the last handle destroys the session.
pub trait HardwareDecoder: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Hand one buffer to the device. The payload is copied before return.
    fn submit(&self, data: &[u8], timestamp: u64, flag: BufferFlag) -> std::result::Result<(), SubmitError>;

    /// Units the device may hold before it emits its first completion
    fn min_in_flight(&self) -> usize {
        1
    }
}

/// Parameters for opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Device node path
    pub device_node: String,

    /// Codec the session decodes
    pub role: DecoderRole,

    /// Coded width
    pub width: u32,

    /// Coded height
    pub height: u32,

    /// Output buffers owned by the device
    pub buffer_count: usize,

    /// Codec configuration record from the container, if any
    pub extradata: Vec<u8>,
}

/// Opens decoder sessions
pub trait DecoderBackend: Send + Sync {
    /// Create a session that reports completions to `handler`
    fn create_session(
        &self,
        params: &SessionParams,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<Arc<dyn HardwareDecoder>>;
}

/// Select the backend named by the configuration
pub fn create_backend(config: &DecoderConfig) -> Result<Box<dyn DecoderBackend>> {
    match config.backend {
        DecoderBackendKind::Loopback => Ok(Box::new(LoopbackBackend::new(
            std::time::Duration::from_micros(config.loopback_latency_us),
        ))),
        #[cfg(feature = "ffmpeg")]
        DecoderBackendKind::Ffmpeg => Ok(Box::new(FfmpegBackend::new())),
        #[cfg(not(feature = "ffmpeg"))]
        DecoderBackendKind::Ffmpeg => Err(crate::utils::error::PipelineError::UnsupportedFormat(
            "the ffmpeg decoder requires building with the `ffmpeg` feature".to_string(),
        )),
    }
}
