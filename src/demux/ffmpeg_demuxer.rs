//! FFmpeg-backed container demuxer
//!
//! Opens a container, selects its best video stream, and yields raw
//! packets. Packets of other streams are returned too; the source stage
//! filters them by stream index.

use super::{Packet, PacketSource, VideoCodec, VideoStreamInfo};
use crate::utils::error::{IntoPipelineError, PipelineError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::info;
use std::path::Path;
use std::sync::Once;

static FFMPEG_INIT: Once = Once::new();

/// Container demuxer
pub struct FfmpegDemuxer {
    /// Input format context
    input: format::context::Input,

    /// Selected video stream
    stream: VideoStreamInfo,
}

impl FfmpegDemuxer {
    /// Open `path` and pick the best video stream
    pub fn open(path: &Path) -> Result<Self> {
        FFMPEG_INIT.call_once(|| {
            if ffmpeg::init().is_ok() {
                ffmpeg::log::set_level(ffmpeg::log::Level::Warning);
            }
        });

        let input = format::input(&path).demux_err(&format!("can't open file {}", path.display()))?;

        let stream = {
            let video = input
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| PipelineError::Demux("no video stream in this file".to_string()))?;
            Self::describe_stream(&video)
        };

        info!(
            "Opened {} ({}): video stream {} {:?} {}x{}",
            path.display(),
            input.format().name(),
            stream.index,
            stream.codec,
            stream.width,
            stream.height
        );

        Ok(Self { input, stream })
    }

    /// Extract codec, tag, dimensions and configuration record
    fn describe_stream(stream: &format::stream::Stream) -> VideoStreamInfo {
        let params = stream.parameters();

        let codec = match params.id() {
            ffmpeg::codec::Id::H264 => VideoCodec::H264,
            ffmpeg::codec::Id::HEVC => VideoCodec::Hevc,
            ffmpeg::codec::Id::MPEG4 => VideoCodec::Mpeg4,
            ffmpeg::codec::Id::VP8 => VideoCodec::Vp8,
            ffmpeg::codec::Id::MPEG2VIDEO => VideoCodec::Mpeg2,
            other => VideoCodec::Other(other.name().to_string()),
        };

        // SAFETY: `params` wraps the stream's live AVCodecParameters; the
        // extradata pointer is valid for `extradata_size` bytes while the
        // input context is open, and we copy it out immediately.
        let (codec_tag, width, height, extradata) = unsafe {
            let raw = &*params.as_ptr();
            let extradata = if raw.extradata.is_null() || raw.extradata_size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(raw.extradata, raw.extradata_size as usize).to_vec()
            };
            (raw.codec_tag, raw.width.max(0) as u32, raw.height.max(0) as u32, extradata)
        };

        VideoStreamInfo {
            index: stream.index(),
            codec,
            codec_tag,
            width,
            height,
            extradata,
        }
    }
}

// SAFETY: the format context is owned by this value and only touched
// through `&mut self`, so it is never used from two threads at once.
unsafe impl Send for FfmpegDemuxer {}

impl PacketSource for FfmpegDemuxer {
    fn stream(&self) -> &VideoStreamInfo {
        &self.stream
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(Some(Packet {
                stream_index: packet.stream(),
                data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                pts: packet.pts(),
                keyframe: packet.is_key(),
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
