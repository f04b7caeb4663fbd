//! Source stage: demuxed packets in, compressed frame units out

use super::context::{PipelineContext, PipelineProgress};
use super::frame_unit::FrameUnit;
use crate::demux::{BitstreamReformatter, PacketSource};
use crate::utils::error::{PipelineError, Result};
use log::{debug, info, warn};
use std::sync::Arc;

/// Reads the selected video stream and feeds the input queue.
///
/// Each unit is tagged with its frame number in the stream, counting
/// packets that were later dropped, so gaps stay visible downstream.
pub struct SourceStage {
    context: Arc<PipelineContext>,
    source: Box<dyn PacketSource>,
    reformatter: Option<Box<dyn BitstreamReformatter>>,
}

impl SourceStage {
    /// Create the stage
    pub fn new(
        context: Arc<PipelineContext>,
        source: Box<dyn PacketSource>,
        reformatter: Option<Box<dyn BitstreamReformatter>>,
    ) -> Self {
        Self {
            context,
            source,
            reformatter,
        }
    }

    /// Load every packet, then push the sentinel
    pub fn run(mut self) -> Result<()> {
        let stream_index = self.source.stream().index;
        let mut frame_number: u64 = 0;
        info!("Source stage started on stream {}", stream_index);

        while let Some(packet) = self.source.read_packet()? {
            if self.context.is_aborted() {
                return Err(PipelineError::Aborted);
            }
            if packet.stream_index != stream_index {
                continue;
            }

            let timestamp = frame_number;
            frame_number += 1;

            let packet = match self.reformatter.as_mut() {
                Some(reformatter) => match reformatter.reformat(packet) {
                    Ok(packet) => packet,
                    Err(e) => {
                        PipelineProgress::bump(&self.context.progress.dropped);
                        warn!("Dropping frame {}: {}", timestamp, e);
                        continue;
                    }
                },
                None => packet,
            };

            // Blocks while the input cache is full
            self.context
                .input_cache
                .acquire()
                .map_err(|_| PipelineError::Aborted)?;

            let mut unit = FrameUnit::new(packet.data, timestamp);
            unit.mark_handled();
            let len = unit.len();
            self.context
                .input_queue
                .push(unit)
                .map_err(|_| PipelineError::Aborted)?;

            let loaded = PipelineProgress::bump(&self.context.progress.loaded);
            debug!("Loaded frame {} ({} bytes), {} loaded", timestamp, len, loaded);
        }

        // The sentinel never waits for a permit
        self.context
            .input_queue
            .push(FrameUnit::end_of_stream(frame_number))
            .map_err(|_| PipelineError::Aborted)?;
        PipelineProgress::finish(&self.context.progress.load_completed);

        info!(
            "Source stage finished: {} frames loaded, {} dropped",
            PipelineProgress::get(&self.context.progress.loaded),
            PipelineProgress::get(&self.context.progress.dropped)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::{MemorySource, Packet};
    use crate::utils::config::PipelineConfig;
    use std::time::{Duration, Instant};

    struct FailOn(u64, u64);

    impl BitstreamReformatter for FailOn {
        fn reformat(&mut self, packet: Packet) -> Result<Packet> {
            self.1 += 1;
            if self.1 == self.0 {
                return Err(PipelineError::reformat_error("corrupt"));
            }
            Ok(packet)
        }
    }

    fn context(input_cache: usize) -> Arc<PipelineContext> {
        PipelineContext::new(&PipelineConfig {
            input_cache_frames: input_cache,
            ..PipelineConfig::default()
        })
    }

    #[test]
    fn test_loads_frames_then_sentinel() {
        let context = context(8);
        let source = MemorySource::from_frames((0..3u8).map(|i| vec![i; 4]));
        SourceStage::new(context.clone(), Box::new(source), None)
            .run()
            .unwrap();

        for ts in 0..3u64 {
            let unit = context.input_queue.try_pop().unwrap();
            assert_eq!(unit.timestamp(), ts);
            assert_eq!(unit.data(), &[ts as u8; 4]);
            assert_eq!(unit.handled(), 1);
        }
        let sentinel = context.input_queue.try_pop().unwrap();
        assert!(sentinel.is_end_of_stream());
        assert!(sentinel.is_empty());
        assert!(context.input_queue.try_pop().is_none());

        assert_eq!(context.input_cache.count(), 5);
        assert!(context.report().load_completed);
    }

    #[test]
    fn test_full_input_cache_blocks_loading() {
        let context = context(2);
        let source = MemorySource::from_frames((0..3u8).map(|i| vec![i]));
        let stage = SourceStage::new(context.clone(), Box::new(source), None);
        let loader = std::thread::spawn(move || stage.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        while context.report().loaded < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(context.report().loaded, 2);
        assert!(!loader.is_finished());

        // Drain one frame the way the submission stage does
        let unit = context.input_queue.pop().unwrap();
        assert_eq!(unit.timestamp(), 0);
        context.input_cache.release();

        loader.join().unwrap().unwrap();
        let report = context.report();
        assert_eq!(report.loaded, 3);
        assert!(report.load_completed);
        assert_eq!(context.input_cache.count(), 0);
    }

    #[test]
    fn test_reformat_failure_drops_frame() {
        let context = context(8);
        let source = MemorySource::from_frames((0..5u8).map(|i| vec![i]));
        SourceStage::new(context.clone(), Box::new(source), Some(Box::new(FailOn(3, 0))))
            .run()
            .unwrap();

        let report = context.report();
        assert_eq!(report.loaded, 4);
        assert_eq!(report.dropped, 1);

        let timestamps: Vec<u64> = std::iter::from_fn(|| context.input_queue.try_pop())
            .filter(|unit| !unit.is_end_of_stream())
            .map(|unit| unit.timestamp())
            .collect();
        assert_eq!(timestamps, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_other_streams_are_skipped() {
        let context = context(8);
        let mut packets = Vec::new();
        for i in 0..4 {
            packets.push(Packet {
                stream_index: i % 2,
                data: vec![i as u8],
                pts: None,
                keyframe: false,
            });
        }
        let stream = MemorySource::from_frames(Vec::new()).stream().clone();
        let source = MemorySource::new(stream, packets);

        SourceStage::new(context.clone(), Box::new(source), None)
            .run()
            .unwrap();
        assert_eq!(context.report().loaded, 2);
    }

    #[test]
    fn test_aborted_run_stops_loading() {
        let context = context(1);
        context.abort(PipelineError::DeviceClosed);

        let source = MemorySource::from_frames(vec![vec![1], vec![2]]);
        let result = SourceStage::new(context.clone(), Box::new(source), None).run();
        assert!(matches!(result, Err(PipelineError::Aborted)));
        assert!(!context.report().load_completed);
    }
}
