//! Pipeline orchestrator
//!
//! Builds a fresh [`PipelineContext`], opens the decoder session with the
//! completion stage as its callback, starts the source, submission and
//! sink threads, and waits until the sink has consumed the sentinel or the
//! run has been aborted. Every thread is joined and the session destroyed
//! before `run` returns, whichever way the run ended.

use super::completion::CompletionStage;
use super::context::{PipelineContext, PipelineProgress, RunReport};
use super::sink::SinkStage;
use super::source::SourceStage;
use super::submission::SubmissionStage;
use crate::decoder::{create_backend, DecoderBackend, SessionParams, StreamInfoExtractor};
use crate::demux::{create_reformatter, BitstreamReformatter, PacketSource};
use crate::internal_error;
use crate::utils::config::{DecoderConfig, PipelineConfig};
use crate::utils::error::{PipelineError, Result};
use crate::utils::format_bytes;
use log::{debug, info};
use std::io::Write;
use std::sync::Arc;
use std::thread;

/// Builder for a single pipeline run
pub struct PipelineBuilder {
    config: PipelineConfig,
    decoder_config: DecoderConfig,
    source: Option<Box<dyn PacketSource>>,
    reformatter: Option<Box<dyn BitstreamReformatter>>,
    backend: Option<Box<dyn DecoderBackend>>,
    output: Option<Box<dyn Write + Send>>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            decoder_config: DecoderConfig::default(),
            source: None,
            reformatter: None,
            backend: None,
            output: None,
        }
    }

    /// Set queue and permit configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set decoder session configuration
    pub fn with_decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder_config = config;
        self
    }

    /// Set the packet source
    pub fn with_source(mut self, source: Box<dyn PacketSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the reformatter chosen from the stream's codec and tag
    pub fn with_reformatter(mut self, reformatter: Box<dyn BitstreamReformatter>) -> Self {
        self.reformatter = Some(reformatter);
        self
    }

    /// Override the backend named by the decoder configuration
    pub fn with_backend(mut self, backend: Box<dyn DecoderBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the destination for decoded frames
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Some(output);
        self
    }

    /// Validate the settings and resolve stream-dependent parts
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        self.decoder_config.validate()?;

        let source = self
            .source
            .ok_or_else(|| PipelineError::InvalidInput("no packet source".to_string()))?;
        let output = self
            .output
            .ok_or_else(|| PipelineError::InvalidInput("no output".to_string()))?;

        let stream = source.stream().clone();
        let extractor = StreamInfoExtractor::new();
        let role = extractor.decoder_role(&stream);

        let reformatter = match self.reformatter {
            Some(reformatter) => Some(reformatter),
            None => create_reformatter(extractor.reformat_kind(&stream), &stream)?,
        };
        let backend = match self.backend {
            Some(backend) => backend,
            None => create_backend(&self.decoder_config)?,
        };

        let session = SessionParams {
            device_node: self.decoder_config.device_node(),
            role,
            width: stream.width,
            height: stream.height,
            buffer_count: self.decoder_config.buffer_count,
            extradata: stream.extradata.clone(),
        };

        Ok(Pipeline {
            config: self.config,
            session,
            source,
            reformatter,
            backend,
            output,
        })
    }
}

/// One configured, not yet started run
pub struct Pipeline {
    config: PipelineConfig,
    session: SessionParams,
    source: Box<dyn PacketSource>,
    reformatter: Option<Box<dyn BitstreamReformatter>>,
    backend: Box<dyn DecoderBackend>,
    output: Box<dyn Write + Send>,
}

/// Aborts the run if a stage thread unwinds
struct PanicGuard {
    context: Arc<PipelineContext>,
    stage: &'static str,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.context
                .abort(internal_error!("{} stage panicked", self.stage));
        }
    }
}

fn spawn_stage<F>(
    name: &'static str,
    context: &Arc<PipelineContext>,
    stage: F,
) -> Result<thread::JoinHandle<()>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let context = Arc::clone(context);
    thread::Builder::new()
        .name(format!("{}-stage", name))
        .spawn(move || {
            let _guard = PanicGuard {
                context: Arc::clone(&context),
                stage: name,
            };
            if let Err(e) = stage() {
                context.abort(e);
            }
        })
        .map_err(|e| internal_error!("spawning {} stage: {}", name, e))
}

impl Pipeline {
    /// Session parameters the decoder will be opened with
    pub fn session_params(&self) -> &SessionParams {
        &self.session
    }

    /// Run to completion.
    ///
    /// Returns the final report once the sentinel has reached the sink, or
    /// the first fatal error after every thread has stopped.
    pub fn run(self) -> Result<RunReport> {
        let context = PipelineContext::new(&self.config);
        let handler = Arc::new(CompletionStage::new(
            Arc::clone(&context),
            self.config.verify_completion_order,
        ));

        let decoder = self.backend.create_session(&self.session, handler)?;
        if self.config.hardware_buffer_slots < decoder.min_in_flight() {
            return Err(PipelineError::Config(format!(
                "{} needs at least {} hardware buffer slots, {} configured",
                decoder.name(),
                decoder.min_in_flight(),
                self.config.hardware_buffer_slots
            )));
        }
        info!(
            "Starting pipeline on {} (input cache {}, output cache {}, hardware slots {})",
            decoder.name(),
            self.config.input_cache_frames,
            self.config.output_cache_frames,
            self.config.hardware_buffer_slots
        );

        let source = SourceStage::new(Arc::clone(&context), self.source, self.reformatter);
        let submission = SubmissionStage::new(Arc::clone(&context), Arc::clone(&decoder), &self.config);
        let sink = SinkStage::new(Arc::clone(&context), self.output);

        let stages: [(&'static str, Box<dyn FnOnce() -> Result<()> + Send>); 3] = [
            ("source", Box::new(move || source.run())),
            ("submit", Box::new(move || submission.run())),
            ("sink", Box::new(move || sink.run())),
        ];
        let mut handles = Vec::with_capacity(stages.len());
        for (name, stage) in stages {
            match spawn_stage(name, &context, stage) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    context.abort(e);
                    break;
                }
            }
        }

        wait_for_completion(&context, &self.config);

        for handle in handles {
            if handle.join().is_err() {
                debug!("Stage thread panicked");
            }
        }
        drop(decoder);

        if let Some(err) = context.take_failure() {
            return Err(err);
        }

        let report = context.report();
        info!(
            "Pipeline finished: {} loaded, {} dropped, {} submitted, {} decoded, {} written ({})",
            report.loaded,
            report.dropped,
            report.submitted,
            report.decoded,
            report.written,
            format_bytes(report.written_bytes)
        );
        Ok(report)
    }
}

/// Poll until the sink finishes or the run is aborted
fn wait_for_completion(context: &PipelineContext, config: &PipelineConfig) {
    let interval = config.poll_interval();
    let log_every = u64::from(config.progress_log_every.max(1));
    let progress = &context.progress;

    let mut polls: u64 = 0;
    while !context.is_decode_completed() && !context.is_aborted() {
        thread::sleep(interval);
        polls += 1;
        if polls % log_every == 0 {
            info!(
                "Waiting for decoding callback: loaded {}, submitted {}, decoded {}",
                PipelineProgress::get(&progress.loaded),
                PipelineProgress::get(&progress.submitted),
                PipelineProgress::get(&progress.decoded)
            );
        }
    }
}
