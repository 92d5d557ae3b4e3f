//! Integration tests for the pipeline manager.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use camcore::buffer::ImageBuffer;
use camcore::error::Error;
use camcore::format::{Fourcc, PixelFormat};
use camcore::negotiation::NegotiationError;
use camcore::pipeline::{PipelineConfig, PipelineManager, PipelineState};
use camcore::stage::builtin::{FrameStatistics, FrameStats, frame_statistics_descriptor};
use camcore::stage::{
    Stage, StageDescriptor, StageRegistry, builtin::debayer_descriptor, builtin_registry,
    stage_factory,
};

use common::*;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_wake_interval(Duration::from_millis(10))
        .with_thread_name("test-pipeline")
}

struct Fixture {
    manager: PipelineManager,
    source: SourceProbe,
    received: Arc<std::sync::Mutex<Vec<Delivery>>>,
    log: EventLog,
}

fn fixture_with(registry: StageRegistry, encodings: &[Fourcc]) -> Fixture {
    let log = new_log();
    let source = MockSource::new(small_catalog(encodings), log.clone());
    let probe = source.probe();
    let sink = MockSink::new(log.clone());
    let received = sink.received();

    let mut manager = PipelineManager::with_config(registry, fast_config());
    manager.set_source(Box::new(source)).unwrap();
    manager.set_sink(Box::new(sink)).unwrap();

    Fixture {
        manager,
        source: probe,
        received,
        log,
    }
}

fn fixture(encodings: &[Fourcc]) -> Fixture {
    fixture_with(builtin_registry(), encodings)
}

fn delivered(f: &Fixture) -> Vec<u64> {
    f.received.lock().unwrap().iter().map(|d| d.sequence).collect()
}

/// A debayer stand-in that refuses to start.
struct RefusingStage {
    descriptor: StageDescriptor,
    formats: Option<(PixelFormat, PixelFormat)>,
    log: EventLog,
}

impl Stage for RefusingStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn set_video_format(&mut self, input: &PixelFormat, output: &PixelFormat) -> bool {
        self.formats = Some((*input, *output));
        true
    }

    fn video_format(&self) -> Option<(PixelFormat, PixelFormat)> {
        self.formats
    }

    fn set_status(&mut self, state: PipelineState) -> bool {
        self.log.lock().unwrap().push(format!("stage:{state}"));
        state != PipelineState::Playing
    }

    fn transform(&mut self, _buffer: &mut ImageBuffer) -> camcore::Result<()> {
        Ok(())
    }
}

// ============================================================================
// State machine
// ============================================================================

#[test]
fn test_attach_moves_to_stopped() {
    let log = new_log();
    let mut manager = PipelineManager::with_config(builtin_registry(), fast_config());
    assert_eq!(manager.status(), PipelineState::Undefined);

    manager
        .set_source(Box::new(MockSource::new(small_catalog(&[Fourcc::YUYV]), log.clone())))
        .unwrap();
    assert_eq!(manager.status(), PipelineState::Stopped);
    assert_eq!(manager.available_video_formats().encodings(), vec![Fourcc::YUYV]);

    assert!(matches!(
        manager.set_status(PipelineState::Playing),
        Err(Error::NoSink)
    ));
    assert_eq!(manager.status(), PipelineState::Stopped);
}

#[test]
fn test_source_without_formats_is_refused() {
    let mut manager = PipelineManager::new(builtin_registry());
    let err = manager
        .set_source(Box::new(MockSource::new(small_catalog(&[]), new_log())))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Negotiation(NegotiationError::NoAvailableFormats)
    ));
    assert_eq!(manager.status(), PipelineState::Undefined);
}

#[test]
fn test_start_and_stop_order() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();
    assert_eq!(f.manager.status(), PipelineState::Playing);
    f.manager.set_status(PipelineState::Stopped).unwrap();
    assert_eq!(f.manager.status(), PipelineState::Stopped);

    assert_eq!(
        events(&f.log),
        vec!["sink:PLAYING", "source:PLAYING", "source:STOPPED", "sink:STOPPED"]
    );
}

#[test]
fn test_set_status_is_idempotent() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();
    let description = f.manager.pipeline_description();
    let before = events(&f.log);

    f.manager.set_status(PipelineState::Playing).unwrap();
    assert_eq!(events(&f.log), before);
    assert_eq!(f.manager.pipeline_description(), description);

    f.manager.set_status(PipelineState::Stopped).unwrap();
    let stopped = events(&f.log);
    f.manager.set_status(PipelineState::Stopped).unwrap();
    assert_eq!(events(&f.log), stopped);
}

#[test]
fn test_reconfiguration_refused_while_playing() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();

    let err = f
        .manager
        .set_source(Box::new(MockSource::new(small_catalog(&[Fourcc::YUYV]), new_log())))
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot set source while PLAYING");
    assert!(matches!(
        f.manager.set_sink(Box::new(MockSink::new(new_log()))),
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        f.manager.set_video_format(small_format(Fourcc::YUYV)),
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        f.manager.create_pipeline(),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn test_rollback_when_stage_refuses() {
    let log = new_log();
    let stage_log = log.clone();
    let registry = builtin_registry().with(
        debayer_descriptor(),
        stage_factory(move || RefusingStage {
            descriptor: debayer_descriptor(),
            formats: None,
            log: stage_log.clone(),
        }),
    );

    let source = MockSource::new(small_catalog(&[Fourcc::RGGB8]), log.clone());
    let sink = MockSink::new(log.clone());
    let mut manager = PipelineManager::with_config(registry, fast_config());
    manager.set_source(Box::new(source)).unwrap();
    manager.set_sink(Box::new(sink)).unwrap();
    manager.set_video_format(small_format(Fourcc::RGB24)).unwrap();

    let err = manager.set_status(PipelineState::Playing).unwrap_err();
    assert!(matches!(err, Error::StageActivationFailed { ref stage } if stage == "debayer"));
    assert_eq!(manager.status(), PipelineState::Stopped);

    assert_eq!(
        events(&log),
        vec![
            "sink:PLAYING",
            "source:PLAYING",
            "stage:PLAYING",
            "source:STOPPED",
            "stage:STOPPED",
            "sink:STOPPED",
        ]
    );
}

#[test]
fn test_rollback_when_source_refuses() {
    let log = new_log();
    let source = MockSource::new(small_catalog(&[Fourcc::YUYV]), log.clone()).refusing_start();
    let mut manager = PipelineManager::with_config(builtin_registry(), fast_config());
    manager.set_source(Box::new(source)).unwrap();
    manager.set_sink(Box::new(MockSink::new(log.clone()))).unwrap();

    assert!(matches!(
        manager.set_status(PipelineState::Playing),
        Err(Error::SourceRejected(_))
    ));
    assert_eq!(manager.status(), PipelineState::Stopped);
    assert_eq!(events(&log).last().map(String::as_str), Some("sink:STOPPED"));
}

#[test]
fn test_negotiation_failure_enters_error() {
    let mut f = fixture(&[Fourcc::RGGB8]);
    f.manager.set_video_format(small_format(Fourcc::MJPEG)).unwrap();

    let err = f.manager.set_status(PipelineState::Playing).unwrap_err();
    assert!(matches!(
        err,
        Error::Negotiation(NegotiationError::NoCompatibleFormat { .. })
    ));
    assert_eq!(f.manager.status(), PipelineState::Error);
    assert!(events(&f.log).is_empty());

    // A plain stop does not clear the error.
    let err = f.manager.set_status(PipelineState::Stopped).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            operation: "stop",
            state: PipelineState::Error
        }
    ));
    assert_eq!(f.manager.status(), PipelineState::Error);

    // Reconfiguring leaves Error.
    f.manager.set_video_format(small_format(Fourcc::RGB24)).unwrap();
    assert_eq!(f.manager.status(), PipelineState::Stopped);
    f.manager.set_status(PipelineState::Playing).unwrap();
    assert_eq!(
        f.manager.pipeline_description(),
        "source(RGGB 4x4 @ 30/1) ! debayer ! sink(RGB3 4x4 @ 30/1)"
    );
    assert_eq!(f.source.format(), Some(small_format(Fourcc::RGGB8)));
}

#[test]
fn test_destroy_pipeline() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();
    f.manager.destroy_pipeline();
    assert_eq!(f.manager.status(), PipelineState::Undefined);
    assert!(f.manager.pipeline_description().is_empty());
    assert!(f.manager.available_video_formats().is_empty());
    assert!(!f.source.push(frame(small_format(Fourcc::YUYV), 1)));
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_fifo_delivery() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();

    for seq in 0..100 {
        assert!(f.source.push(frame(small_format(Fourcc::YUYV), seq)));
    }
    assert!(wait_until(TIMEOUT, || delivered(&f).len() == 100));
    assert_eq!(delivered(&f), (0..100).collect::<Vec<_>>());
    assert!(wait_until(TIMEOUT, || f.source.requeued().len() == 100));
}

#[test]
fn test_fifo_per_producer_thread() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();

    let producers: Vec<_> = (0..2u64)
        .map(|id| {
            let handle = f.source.handle();
            thread::spawn(move || {
                for i in 0..50 {
                    let _ = handle.push_image(frame(small_format(Fourcc::YUYV), id * 1000 + i));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_until(TIMEOUT, || delivered(&f).len() == 100));
    let seqs = delivered(&f);
    for id in 0..2u64 {
        let own: Vec<u64> = seqs.iter().copied().filter(|s| s / 1000 == id).collect();
        assert_eq!(own, (0..50).map(|i| id * 1000 + i).collect::<Vec<_>>());
    }
}

#[test]
fn test_conversion_applied_in_flight() {
    let mut f = fixture(&[Fourcc::RGGB8]);
    f.manager.set_video_format(small_format(Fourcc::RGB24)).unwrap();
    f.manager.set_status(PipelineState::Playing).unwrap();
    assert_eq!(f.manager.video_format(), Some(small_format(Fourcc::RGB24)));

    assert!(f.source.push(frame(small_format(Fourcc::RGGB8), 7)));
    assert!(wait_until(TIMEOUT, || delivered(&f).len() == 1));

    let delivery = f.received.lock().unwrap()[0].clone();
    assert_eq!(delivery.sequence, 7);
    assert_eq!(delivery.format, small_format(Fourcc::RGB24));
    assert_eq!(delivery.len, 4 * 4 * 3);
}

#[test]
fn test_push_while_stopped_returns_to_source() {
    let f = fixture(&[Fourcc::YUYV]);
    assert!(!f.source.push(frame(small_format(Fourcc::YUYV), 1)));

    f.manager.push_image(frame(small_format(Fourcc::YUYV), 2));
    assert_eq!(f.source.requeued(), vec![1, 2]);
    assert!(delivered(&f).is_empty());
    assert_eq!(f.manager.queue_stats().total_rejected, 2);
}

#[test]
fn test_damaged_frames_dropped_on_request() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.drop_incomplete_frames(true).unwrap();
    assert!(f.manager.should_incomplete_frames_be_dropped());
    f.manager.set_status(PipelineState::Playing).unwrap();

    let mut damaged = frame(small_format(Fourcc::YUYV), 1);
    damaged.meta_mut().damaged = true;
    f.source.push(damaged);
    f.source.push(frame(small_format(Fourcc::YUYV), 2));

    assert!(wait_until(TIMEOUT, || f.source.requeued().len() == 2));
    assert_eq!(delivered(&f), vec![2]);
}

#[test]
fn test_shutdown_stops_growth() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();
    for seq in 0..20 {
        f.source.push(frame(small_format(Fourcc::YUYV), seq));
    }
    f.manager.set_status(PipelineState::Stopped).unwrap();

    assert!(!f.source.push(frame(small_format(Fourcc::YUYV), 99)));
    let stats = f.manager.queue_stats();
    assert_eq!(stats.current_buffers, 0);

    // Every buffer is accounted for: delivered then requeued, or requeued unseen.
    let mut requeued = f.source.requeued();
    requeued.sort_unstable();
    let mut expected: Vec<u64> = (0..20).collect();
    expected.push(99);
    assert_eq!(requeued, expected);
}

#[test]
fn test_pause_and_resume() {
    let mut f = fixture(&[Fourcc::YUYV]);
    f.manager.set_status(PipelineState::Playing).unwrap();
    f.manager.set_status(PipelineState::Paused).unwrap();
    assert_eq!(f.manager.status(), PipelineState::Paused);

    assert!(f.source.push(frame(small_format(Fourcc::YUYV), 1)));
    thread::sleep(Duration::from_millis(50));
    assert!(delivered(&f).is_empty());

    f.manager.set_status(PipelineState::Playing).unwrap();
    assert!(wait_until(TIMEOUT, || delivered(&f) == vec![1]));
    // Resuming does not restart components.
    assert_eq!(events(&f.log), vec!["sink:PLAYING", "source:PLAYING"]);
}

#[test]
fn test_interpretation_stage_sees_every_frame() {
    let stats = Arc::new(FrameStats::default());
    let shared = stats.clone();
    let registry = builtin_registry().with(
        frame_statistics_descriptor(),
        stage_factory(move || FrameStatistics::with_stats(shared.clone())),
    );
    let mut f = fixture_with(registry, &[Fourcc::RGGB8]);
    f.manager.set_video_format(small_format(Fourcc::BGR24)).unwrap();
    f.manager.set_status(PipelineState::Playing).unwrap();
    assert_eq!(
        f.manager.pipeline_description(),
        "source(RGGB 4x4 @ 30/1) ! frame-statistics ! debayer ! sink(BGR3 4x4 @ 30/1)"
    );

    for seq in 0..3 {
        f.source.push(frame(small_format(Fourcc::RGGB8), seq));
    }
    assert!(wait_until(TIMEOUT, || delivered(&f).len() == 3));
    assert_eq!(stats.frames(), 3);
}
