//! FFmpeg software decoder device
//!
//! Presents FFmpeg's decoder through the same asynchronous contract as the
//! hardware: submissions queue to a worker thread that owns the codec
//! context, and every decoded picture is delivered to the completion
//! callback as planar I420 in a pool-owned output buffer.

use super::{
    BufferFlag, CompletionHandler, DecodedOutput, DecoderBackend, DecoderRole, HardwareDecoder,
    OutputPool, SessionParams, SubmitError,
};
use crate::utils::error::{PipelineError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use ffmpeg_next as ffmpeg;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;

struct Job {
    data: Vec<u8>,
    timestamp: u64,
    flag: BufferFlag,
}

/// Opens FFmpeg software sessions
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }
}

impl DecoderBackend for FfmpegBackend {
    fn create_session(
        &self,
        params: &SessionParams,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<Arc<dyn HardwareDecoder>> {
        Ok(Arc::new(FfmpegDecoder::open(params, handler)?))
    }
}

/// An open FFmpeg software session
pub struct FfmpegDecoder {
    name: String,
    input: Option<Sender<Job>>,
    pool: Arc<OutputPool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FfmpegDecoder {
    /// Open a decoder for the session's role and start its worker
    pub fn open(params: &SessionParams, handler: Arc<dyn CompletionHandler>) -> Result<Self> {
        ffmpeg::init().map_err(|e| PipelineError::SessionCreate(format!("ffmpeg init: {}", e)))?;

        let stream = StreamSetup {
            codec_id: codec_for_role(params.role),
            width: params.width,
            height: params.height,
            extradata: params.extradata.clone(),
        };
        let (input, jobs) = bounded(params.buffer_count.max(1));
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let pool = Arc::new(OutputPool::new(params.buffer_count.max(1)));

        let worker = {
            let pool = Arc::clone(&pool);
            thread::Builder::new()
                .name("ffmpeg-dec".to_string())
                .spawn(move || run_worker(stream, jobs, ready_tx, pool, handler))
                .map_err(|e| PipelineError::SessionCreate(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = worker.join();
                return Err(PipelineError::SessionCreate(msg));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(PipelineError::SessionCreate("decoder worker exited".to_string()));
            }
        }

        let name = format!("ffmpeg:{:?}", params.role);
        info!("Opened {} ({}x{})", name, params.width, params.height);

        Ok(Self {
            name,
            input: Some(input),
            pool,
            worker: Some(worker),
        })
    }
}

impl HardwareDecoder for FfmpegDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, data: &[u8], timestamp: u64, flag: BufferFlag) -> std::result::Result<(), SubmitError> {
        let input = self.input.as_ref().ok_or(SubmitError::Closed)?;
        input
            .try_send(Job {
                data: data.to_vec(),
                timestamp,
                flag,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => SubmitError::Busy,
                TrySendError::Disconnected(_) => SubmitError::Closed,
            })
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.input.take();
        self.pool.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!("Destroyed {}", self.name);
    }
}

fn codec_for_role(role: DecoderRole) -> ffmpeg::codec::Id {
    match role {
        DecoderRole::H264 => ffmpeg::codec::Id::H264,
        DecoderRole::Hevc => ffmpeg::codec::Id::HEVC,
        DecoderRole::Mpeg4 => ffmpeg::codec::Id::MPEG4,
        DecoderRole::Vp8 => ffmpeg::codec::Id::VP8,
        DecoderRole::Mpeg2 => ffmpeg::codec::Id::MPEG2VIDEO,
    }
}

/// Frame-number tag of a decoded picture; negative or missing pts fall back
fn picture_timestamp(pts: Option<i64>, fallback: u64) -> u64 {
    pts.and_then(|pts| u64::try_from(pts).ok()).unwrap_or(fallback)
}

/// What the codec context needs to know before it is opened
struct StreamSetup {
    codec_id: ffmpeg::codec::Id,
    width: u32,
    height: u32,
    extradata: Vec<u8>,
}

fn open_decoder(stream: &StreamSetup) -> std::result::Result<ffmpeg::decoder::Video, String> {
    let codec_id = stream.codec_id;
    let codec = ffmpeg::codec::decoder::find(codec_id)
        .ok_or_else(|| format!("no FFmpeg decoder for {:?}", codec_id))?;
    let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);

    // SAFETY: the context is freshly allocated and not yet opened. The
    // extradata copy is allocated with av_mallocz including the required
    // padding, and avcodec_free_context releases it with the context.
    unsafe {
        let raw = context.as_mut_ptr();
        (*raw).width = i32::try_from(stream.width).unwrap_or(0);
        (*raw).height = i32::try_from(stream.height).unwrap_or(0);

        if !stream.extradata.is_empty() {
            let size = i32::try_from(stream.extradata.len())
                .map_err(|_| "extradata too large".to_string())?;
            let padding = ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let buf = ffmpeg::ffi::av_mallocz(stream.extradata.len() + padding) as *mut u8;
            if buf.is_null() {
                return Err("allocating extradata".to_string());
            }
            std::ptr::copy_nonoverlapping(stream.extradata.as_ptr(), buf, stream.extradata.len());
            (*raw).extradata = buf;
            (*raw).extradata_size = size;
        }
    }

    context
        .decoder()
        .video()
        .map_err(|e| format!("opening {:?} decoder: {}", codec_id, e))
}

struct Worker {
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    pool: Arc<OutputPool>,
    handler: Arc<dyn CompletionHandler>,
}

fn run_worker(
    stream: StreamSetup,
    jobs: Receiver<Job>,
    ready: Sender<std::result::Result<(), String>>,
    pool: Arc<OutputPool>,
    handler: Arc<dyn CompletionHandler>,
) {
    let decoder = match open_decoder(&stream) {
        Ok(decoder) => decoder,
        Err(msg) => {
            let _ = ready.send(Err(msg));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut worker = Worker {
        decoder,
        scaler: None,
        pool,
        handler,
    };

    while let Ok(job) = jobs.recv() {
        let running = match job.flag {
            BufferFlag::EndOfFrame => worker.decode(&job.data, job.timestamp),
            BufferFlag::EndOfStream => worker.finish(job.timestamp),
        };
        if !running {
            break;
        }
    }

    debug!("FFmpeg decoder worker finished");
}

impl Worker {
    /// Decode one submitted frame and retire it exactly once
    fn decode(&mut self, data: &[u8], timestamp: u64) -> bool {
        let mut packet = ffmpeg::Packet::copy(data);
        packet.set_pts(i64::try_from(timestamp).ok());

        let mut retired = false;
        match self.decoder.send_packet(&packet) {
            Ok(()) => {
                if !self.drain(timestamp, &mut retired) {
                    return false;
                }
            }
            Err(e) => warn!("Decoder rejected frame {}: {}", timestamp, e),
        }

        // Parameter sets, first fields and rejected packets end up here
        if !retired {
            self.handler.on_consumed(timestamp);
        }
        true
    }

    fn finish(&mut self, timestamp: u64) -> bool {
        if let Err(e) = self.decoder.send_eof() {
            warn!("Decoder flush failed: {}", e);
        }
        // Pictures held for reordering belong to units retired earlier
        let mut retired = true;
        if !self.drain(timestamp, &mut retired) {
            return false;
        }

        self.handler.on_output(
            &self.pool,
            DecodedOutput {
                buffer: None,
                data: &[],
                timestamp,
                flag: BufferFlag::EndOfStream,
                retires_unit: true,
            },
        );
        true
    }

    /// Deliver every picture the decoder has ready. The first one delivered
    /// retires the current unit unless `retired` is already set.
    fn drain(&mut self, fallback_ts: u64, retired: &mut bool) -> bool {
        let mut frame = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            let timestamp = picture_timestamp(frame.pts(), fallback_ts);

            let Some(mut buffer) = self.pool.checkout() else {
                return false;
            };
            buffer.data.clear();
            if let Err(e) = self.write_i420(&frame, &mut buffer.data) {
                warn!("Dropping picture {}: {}", timestamp, e);
                self.pool.restore(buffer);
                continue;
            }

            let retires_unit = !*retired;
            *retired = true;
            self.handler.on_output(
                &self.pool,
                DecodedOutput {
                    buffer: Some(buffer.id),
                    data: &buffer.data,
                    timestamp,
                    flag: BufferFlag::EndOfFrame,
                    retires_unit,
                },
            );
            self.pool.restore(buffer);
        }
        true
    }

    /// Pack a picture as contiguous I420, converting other pixel formats
    fn write_i420(&mut self, frame: &ffmpeg::frame::Video, out: &mut Vec<u8>) -> std::result::Result<(), ffmpeg::Error> {
        let target = ffmpeg::format::Pixel::YUV420P;

        let converted;
        let picture = if frame.format() == target {
            frame
        } else {
            let stale = self.scaler.as_ref().map_or(true, |s| {
                s.input().format != frame.format()
                    || s.input().width != frame.width()
                    || s.input().height != frame.height()
            });
            if stale {
                self.scaler = Some(ffmpeg::software::scaling::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    target,
                    frame.width(),
                    frame.height(),
                    ffmpeg::software::scaling::Flags::BILINEAR,
                )?);
            }

            let mut scaled = ffmpeg::frame::Video::empty();
            if let Some(scaler) = self.scaler.as_mut() {
                scaler.run(frame, &mut scaled)?;
            }
            converted = scaled;
            &converted
        };

        let width = picture.width() as usize;
        let height = picture.height() as usize;
        for plane in 0..3 {
            let (plane_width, plane_height) = if plane == 0 {
                (width, height)
            } else {
                ((width + 1) / 2, (height + 1) / 2)
            };
            let stride = picture.stride(plane);
            let data = picture.data(plane);
            for row in 0..plane_height {
                let start = row * stride;
                out.extend_from_slice(&data[start..start + plane_width]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picture_timestamp_fallback() {
        assert_eq!(picture_timestamp(Some(12), 3), 12);
        assert_eq!(picture_timestamp(None, 3), 3);
        assert_eq!(picture_timestamp(Some(-1), 3), 3);
        assert_eq!(picture_timestamp(Some(i64::MIN), 0), 0);
    }
}
