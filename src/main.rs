use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use hwdec_pipe::demux::open_source;
use hwdec_pipe::sink::FileSink;
use hwdec_pipe::utils::{load_config, Config, DecoderBackendKind};
use hwdec_pipe::PipelineBuilder;
use log::{error, info};
use std::path::PathBuf;

/// hwdec-pipe - decode a video stream through a hardware decoder into raw frames
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Container file to read compressed video from
    #[arg(long = "input_filename", value_name = "FILE")]
    input_filename: PathBuf,

    /// Raw output file for decoded frames
    #[arg(long = "output_filename", value_name = "FILE")]
    output_filename: PathBuf,

    /// Enable debug logging (0 or 1)
    #[arg(long = "debug_flag", default_value_t = 0)]
    debug_flag: u8,

    /// Decoder device index
    #[arg(long = "dec_device_id")]
    dec_device_id: Option<u32>,

    /// Decoder back-end (loopback or ffmpeg)
    #[arg(long = "decoder")]
    decoder: Option<DecoderBackendKind>,

    /// Compressed frames allowed to wait for submission
    #[arg(long = "input_cache")]
    input_cache: Option<usize>,

    /// Decoded frames allowed to wait for the writer
    #[arg(long = "output_cache")]
    output_cache: Option<usize>,

    /// Frames allowed inside the decoder at once
    #[arg(long = "hardware_buffers")]
    hardware_buffers: Option<usize>,

    /// Configuration file to use instead of the system and user files
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long = "report", value_name = "FILE")]
    report: Option<PathBuf>,
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => load_config()?,
    };

    if let Some(id) = args.dec_device_id {
        config.decoder.device_id = id;
    }
    if let Some(backend) = args.decoder {
        config.decoder.backend = backend;
    }
    if let Some(frames) = args.input_cache {
        config.pipeline.input_cache_frames = frames;
    }
    if let Some(frames) = args.output_cache {
        config.pipeline.output_cache_frames = frames;
    }
    if let Some(slots) = args.hardware_buffers {
        config.pipeline.hardware_buffer_slots = slots;
    }
    if args.debug_flag != 0 {
        config.general.log_level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = build_config(&args)?;

    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or(config.general.log_level.as_str()))
        .format_timestamp_millis()
        .init();

    info!("Starting hwdec-pipe v{}", env!("CARGO_PKG_VERSION"));

    let output = FileSink::create(&args.output_filename)
        .with_context(|| format!("opening {}", args.output_filename.display()))?;
    let source = open_source(&args.input_filename)
        .with_context(|| format!("opening {}", args.input_filename.display()))?;

    let pipeline = PipelineBuilder::new()
        .with_config(config.pipeline.clone())
        .with_decoder_config(config.decoder.clone())
        .with_source(source)
        .with_output(Box::new(output))
        .build()?;

    let report = match pipeline.run() {
        Ok(report) => report,
        Err(e) => {
            error!("Decoding failed: {}", e);
            return Err(e.into());
        }
    };

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Run report written to {}", path.display());
    }

    info!(
        "Decoded {} of {} frames into {}",
        report.written,
        report.loaded,
        args.output_filename.display()
    );
    Ok(())
}
