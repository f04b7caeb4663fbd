//! In-memory packet source

use super::{Packet, PacketSource, VideoCodec, VideoStreamInfo};
use crate::utils::error::Result;
use std::collections::VecDeque;

/// Serves a fixed list of packets, then end of input
#[derive(Debug, Clone)]
pub struct MemorySource {
    stream: VideoStreamInfo,
    packets: VecDeque<Packet>,
}

impl MemorySource {
    /// Create a source for `stream` yielding `packets` in order
    pub fn new(stream: VideoStreamInfo, packets: Vec<Packet>) -> Self {
        Self {
            stream,
            packets: packets.into(),
        }
    }

    /// Start-code H.264 stream at index 0, one packet per payload, the first a keyframe
    pub fn from_frames<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let stream = VideoStreamInfo {
            index: 0,
            codec: VideoCodec::H264,
            codec_tag: super::fourcc(b"H264"),
            width: 320,
            height: 240,
            extradata: Vec::new(),
        };

        let packets = frames
            .into_iter()
            .enumerate()
            .map(|(i, data)| Packet {
                stream_index: 0,
                data,
                pts: Some(i as i64),
                keyframe: i == 0,
            })
            .collect();

        Self::new(stream, packets)
    }

    /// Packets not yet read
    pub fn remaining(&self) -> usize {
        self.packets.len()
    }
}

impl PacketSource for MemorySource {
    fn stream(&self) -> &VideoStreamInfo {
        &self.stream
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.packets.pop_front())
    }
}
