//! End-to-end runs of the decode pipeline
//!
//! These tests drive complete runs through the loopback and scripted
//! devices and check:
//! - Output contents and frame order
//! - Counter conservation and completion flags
//! - Queue and device occupancy bounds
//! - Fatal error propagation and clean shutdown

use anyhow::Result;
use hwdec_pipe::demux::MemorySource;
use hwdec_pipe::sink::FileSink;
use hwdec_pipe::utils::PipelineConfig;
use hwdec_pipe::{PipelineBuilder, PipelineError, RunReport};
use hwdec_pipe_integration_tests::{frames, Behaviour, FailingReformatter, ScriptedBackend, TestFixture};
use std::path::Path;
use std::thread;

fn config(input_cache: usize, output_cache: usize, hardware_slots: usize) -> PipelineConfig {
    PipelineConfig {
        input_cache_frames: input_cache,
        output_cache_frames: output_cache,
        hardware_buffer_slots: hardware_slots,
        poll_interval_ms: 1,
        ..PipelineConfig::default()
    }
}

fn run_to_file(
    payloads: Vec<Vec<u8>>,
    config: PipelineConfig,
    output: &Path,
    setup: impl FnOnce(PipelineBuilder) -> PipelineBuilder,
) -> hwdec_pipe::Result<RunReport> {
    let builder = PipelineBuilder::new()
        .with_config(config)
        .with_source(Box::new(MemorySource::from_frames(payloads)))
        .with_output(Box::new(FileSink::create(output)?));
    setup(builder).build()?.run()
}

#[test]
fn test_small_caches_deliver_every_frame_in_order() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("small.yuv");
    let payloads = frames(5, 0x10);

    let report = run_to_file(payloads.clone(), config(2, 2, 1), &output, |b| b)?;

    assert_eq!(std::fs::read(&output)?, payloads.concat());
    assert_eq!(report.loaded, 5);
    assert_eq!(report.submitted, 5);
    assert_eq!(report.retired, 5);
    assert_eq!(report.decoded, 5);
    assert_eq!(report.written, 5);
    assert_eq!(report.written_bytes, payloads.concat().len() as u64);
    assert!(report.all_completed());

    // The input sentinel is the only unit that enters without a permit
    assert!(report.input_queue_peak <= 3);
    assert!(report.output_queue_peak <= 2);
    Ok(())
}

#[test]
fn test_reformat_failure_drops_only_that_frame() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("dropped.yuv");
    let payloads = frames(5, 0x20);

    let report = run_to_file(payloads.clone(), config(4, 4, 2), &output, |b| {
        b.with_reformatter(Box::new(FailingReformatter::failing_at(3)))
    })?;

    let mut expected = payloads;
    expected.remove(2);
    assert_eq!(std::fs::read(&output)?, expected.concat());

    assert_eq!(report.loaded, 4);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.submitted, 4);
    assert_eq!(report.decoded, 4);
    assert_eq!(report.written, 4);
    assert!(report.all_completed());
    Ok(())
}

#[test]
fn test_rejecting_decoder_aborts_after_retry_budget() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("rejected.yuv");
    let backend = ScriptedBackend::new(Behaviour::AlwaysBusy);
    let stats = backend.stats.clone();

    let cfg = PipelineConfig {
        submit_retry_limit: 100,
        submit_retry_delay_us: 0,
        ..config(2, 2, 1)
    };
    let result = run_to_file(frames(5, 0x30), cfg, &output, |b| b.with_backend(Box::new(backend)));

    match result {
        Err(PipelineError::SubmitRetriesExhausted { attempts, timestamp }) => {
            assert_eq!(attempts, 100);
            assert_eq!(timestamp, 0);
        }
        other => panic!("expected retry exhaustion, got {:?}", other),
    }
    assert_eq!(stats.rejected.load(std::sync::atomic::Ordering::SeqCst), 100);
    assert!(std::fs::read(&output)?.is_empty());
    Ok(())
}

#[test]
fn test_order_survives_jittered_completions() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("jitter.yuv");
    let payloads = frames(60, 0x40);
    let backend = ScriptedBackend::new(Behaviour::Jitter);
    let stats = backend.stats.clone();

    let report = run_to_file(payloads.clone(), config(4, 3, 2), &output, |b| {
        b.with_backend(Box::new(backend))
    })?;

    assert_eq!(std::fs::read(&output)?, payloads.concat());
    assert_eq!(report.out_of_order, 0);
    assert_eq!(report.written, 60);
    assert!(report.all_completed());

    // Frames plus the end-of-stream unit
    assert_eq!(stats.accepted.load(std::sync::atomic::Ordering::SeqCst), 61);
    assert!(stats.peak() <= 2, "device held {} units", stats.peak());
    Ok(())
}

#[test]
fn test_frames_without_pictures_still_free_their_slots() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("coalesce.yuv");
    let payloads = frames(20, 0x90);
    let backend = ScriptedBackend::new(Behaviour::Coalesce);
    let stats = backend.stats.clone();

    let report = run_to_file(payloads.clone(), config(4, 4, 4), &output, |b| {
        b.with_backend(Box::new(backend))
    })?;

    let expected: Vec<u8> = payloads.iter().step_by(2).flatten().copied().collect();
    assert_eq!(std::fs::read(&output)?, expected);

    assert_eq!(report.submitted, 20);
    assert_eq!(report.retired, 20);
    assert_eq!(report.decoded, 10);
    assert_eq!(report.written, 10);
    assert!(report.all_completed());
    assert!(stats.peak() <= 4, "device held {} units", stats.peak());
    Ok(())
}

#[test]
fn test_extra_pictures_do_not_free_extra_slots() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("split.yuv");
    let payloads = frames(12, 0xa0);
    let backend = ScriptedBackend::new(Behaviour::Split);
    let stats = backend.stats.clone();

    let cfg = PipelineConfig {
        verify_completion_order: false,
        ..config(3, 2, 2)
    };
    let report = run_to_file(payloads.clone(), cfg, &output, |b| b.with_backend(Box::new(backend)))?;

    let expected: Vec<u8> = payloads.iter().flat_map(|p| p.repeat(2)).collect();
    assert_eq!(std::fs::read(&output)?, expected);

    assert_eq!(report.submitted, 12);
    assert_eq!(report.retired, 12);
    assert_eq!(report.decoded, 24);
    assert!(report.all_completed());
    assert!(stats.peak() <= 2, "device held {} units", stats.peak());
    Ok(())
}

#[test]
fn test_queue_peaks_respect_permits() -> Result<()> {
    let fixture = TestFixture::new()?;
    for (input, output_cache, slots) in [(1, 1, 1), (3, 1, 2), (8, 5, 4)] {
        let output = fixture.output(&format!("peaks-{}-{}-{}.yuv", input, output_cache, slots));
        let report = run_to_file(frames(40, 0x50), config(input, output_cache, slots), &output, |b| b)?;

        assert!(report.input_queue_peak <= input + 1);
        assert!(report.output_queue_peak <= output_cache);
        assert_eq!(report.written, 40);
    }
    Ok(())
}

#[test]
fn test_unwritable_output_fails_before_start() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.path().join("no-such-dir").join("out.yuv");

    let result = run_to_file(frames(3, 0x60), config(2, 2, 1), &output, |b| b);
    assert!(matches!(result, Err(PipelineError::FileIO(_))));
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_session_create_failure_is_fatal() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("no-session.yuv");

    let result = run_to_file(frames(3, 0x70), config(2, 2, 1), &output, |b| {
        b.with_backend(Box::new(ScriptedBackend::new(Behaviour::FailOpen)))
    });
    assert!(matches!(result, Err(PipelineError::SessionCreate(_))));
    assert!(std::fs::read(&output)?.is_empty());
    Ok(())
}

#[test]
fn test_device_reorder_depth_checked_against_slots() -> Result<()> {
    let fixture = TestFixture::new()?;
    let output = fixture.output("depth.yuv");
    let backend = ScriptedBackend::new(Behaviour::Jitter).with_min_in_flight(8);

    let result = run_to_file(frames(3, 0x80), config(2, 2, 4), &output, |b| {
        b.with_backend(Box::new(backend))
    });
    assert!(matches!(result, Err(PipelineError::Config(_))));
    Ok(())
}

#[test]
fn test_concurrent_runs_are_independent() -> Result<()> {
    let fixture = TestFixture::new()?;
    let first = fixture.output("first.yuv");
    let second = fixture.output("second.yuv");
    let first_payloads = frames(30, 0x01);
    let second_payloads = frames(45, 0x02);

    let handles = [
        (first.clone(), first_payloads.clone()),
        (second.clone(), second_payloads.clone()),
    ]
    .map(|(path, payloads)| {
        thread::spawn(move || run_to_file(payloads, config(3, 2, 1), &path, |b| b))
    });

    for handle in handles {
        let report = handle.join().expect("run thread panicked")?;
        assert!(report.all_completed());
    }

    assert_eq!(std::fs::read(&first)?, first_payloads.concat());
    assert_eq!(std::fs::read(&second)?, second_payloads.concat());
    Ok(())
}
