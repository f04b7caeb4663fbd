//! Destinations for decoded frames
//!
//! Decoded payloads are persisted as a flat file: frames back to back in
//! original frame order, with no header or framing.

mod file_sink;

pub use file_sink::FileSink;
