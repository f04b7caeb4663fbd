//! Decoder role and bitstream reformat selection
//!
//! Maps the demuxed video stream's codec and container tag to the decoder
//! role a session is opened with, and decides whether packets must be
//! rewritten from length-prefixed to start-code form first.

use crate::demux::{fourcc, VideoCodec, VideoStreamInfo};
use log::{debug, info};

/// Codec a decoder session is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderRole {
    H264,
    Hevc,
    Mpeg4,
    Vp8,
    Mpeg2,
}

/// Bitstream rewrite applied before submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReformatKind {
    /// Packets are already in start-code form
    None,

    /// H.264 `avcC` length-prefixed packets
    H264,

    /// HEVC `hvcC` length-prefixed packets
    Hevc,
}

/// Stream information extractor
#[derive(Debug, Default)]
pub struct StreamInfoExtractor;

impl StreamInfoExtractor {
    /// Create a new stream info extractor
    pub fn new() -> Self {
        Self
    }

    /// Decoder role for the stream. Unknown codecs fall back to H.264.
    pub fn decoder_role(&self, stream: &VideoStreamInfo) -> DecoderRole {
        let role = match stream.codec {
            VideoCodec::H264 => DecoderRole::H264,
            VideoCodec::Hevc => DecoderRole::Hevc,
            VideoCodec::Mpeg4 => DecoderRole::Mpeg4,
            VideoCodec::Vp8 => DecoderRole::Vp8,
            VideoCodec::Mpeg2 => DecoderRole::Mpeg2,
            VideoCodec::Other(ref name) => {
                info!("Unrecognised codec '{}', using H.264 decoder role", name);
                DecoderRole::H264
            }
        };
        debug!("Stream {} codec {:?} -> role {:?}", stream.index, stream.codec, role);
        role
    }

    /// Reformat needed for the stream's container tag
    pub fn reformat_kind(&self, stream: &VideoStreamInfo) -> ReformatKind {
        let tag = stream.codec_tag;
        match stream.codec {
            VideoCodec::H264 if tag == fourcc(b"avc1") || tag == 0 => ReformatKind::H264,
            VideoCodec::Hevc
                if tag == fourcc(b"hev1") || tag == fourcc(b"hvc1") || tag == 0 =>
            {
                ReformatKind::Hevc
            }
            _ => ReformatKind::None,
        }
    }
}
