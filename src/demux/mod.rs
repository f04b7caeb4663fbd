//! Demuxing module for hwdec-pipe
//!
//! Compressed packets come from a [`PacketSource`]; for some container and
//! codec combinations they pass through a [`BitstreamReformatter`] before
//! they are wrapped into frame units.

mod annexb;
mod memory;

#[cfg(feature = "ffmpeg")]
mod ffmpeg_demuxer;

pub use annexb::AnnexBReformatter;
pub use memory::MemorySource;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_demuxer::FfmpegDemuxer;

use crate::decoder::ReformatKind;
use crate::utils::error::Result;
use std::path::Path;

/// Build a little-endian four-character code, as containers store them
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    (tag[0] as u32) | (tag[1] as u32) << 8 | (tag[2] as u32) << 16 | (tag[3] as u32) << 24
}

/// Video codec of the selected stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Hevc,
    Mpeg4,
    Vp8,
    Mpeg2,
    Other(String),
}

/// The video stream packets are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStreamInfo {
    /// Stream index inside the container
    pub index: usize,

    /// Codec
    pub codec: VideoCodec,

    /// Container codec tag (fourcc)
    pub codec_tag: u32,

    /// Coded width
    pub width: u32,

    /// Coded height
    pub height: u32,

    /// Codec configuration record (`avcC` / `hvcC` for length-prefixed streams)
    pub extradata: Vec<u8>,
}

/// One demuxed compressed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Stream the packet belongs to
    pub stream_index: usize,

    /// Compressed payload
    pub data: Vec<u8>,

    /// Presentation timestamp in stream time base
    pub pts: Option<i64>,

    /// Packet starts a keyframe
    pub keyframe: bool,
}

/// Demuxed compressed bitstream packets.
pub trait PacketSource: Send {
    /// The selected video stream
    fn stream(&self) -> &VideoStreamInfo;

    /// Read the next packet of any stream, or `None` at end of input
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}

/// Rewrites packets into the form the decoder accepts
pub trait BitstreamReformatter: Send {
    /// Convert one packet; an error drops that packet only
    fn reformat(&mut self, packet: Packet) -> Result<Packet>;
}

/// Reformatter for the stream, if one is needed
pub fn create_reformatter(
    kind: ReformatKind,
    stream: &VideoStreamInfo,
) -> Result<Option<Box<dyn BitstreamReformatter>>> {
    match kind {
        ReformatKind::None => Ok(None),
        ReformatKind::H264 => Ok(Some(Box::new(AnnexBReformatter::h264(&stream.extradata)?))),
        ReformatKind::Hevc => Ok(Some(Box::new(AnnexBReformatter::hevc(&stream.extradata)?))),
    }
}

/// Open a container file and select its best video stream
#[cfg(feature = "ffmpeg")]
pub fn open_source(path: &Path) -> Result<Box<dyn PacketSource>> {
    Ok(Box::new(FfmpegDemuxer::open(path)?))
}

/// Open a container file and select its best video stream
#[cfg(not(feature = "ffmpeg"))]
pub fn open_source(path: &Path) -> Result<Box<dyn PacketSource>> {
    Err(crate::utils::error::PipelineError::UnsupportedFormat(format!(
        "{}: container input requires building with the `ffmpeg` feature",
        path.display()
    )))
}
