//! hwdec-pipe - back-pressured hardware video decode pipeline
//!
//! Streams compressed frames from a demuxer through an asynchronous
//! decoder device into a raw output file, with counting permits bounding
//! memory and device occupancy at every stage boundary.

pub mod decoder;
pub mod demux;
pub mod pipeline;
pub mod sink;
pub mod utils;

pub use pipeline::{Pipeline, PipelineBuilder, RunReport};
pub use utils::error::{PipelineError, Result};
