//! Tests for the acquisition pipeline
//!
//! These tests verify:
//! - Batches submitted from another thread are written in order and finalized
//! - Recoverable rejections are counted without stopping the writer
//! - Fatal errors stop the writer and surface from finish

use std::io::ErrorKind;
use std::path::Path;
use std::thread;

use rtdc::writer::{AcquisitionPipeline, ContainerSession, EventBatch, OpenMode};
use rtdc::{Config, MemoryBackend, NdArray, RtdcError, SchemaValidator, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup_pipeline(capacity: usize) -> (MemoryBackend, AcquisitionPipeline) {
    init_tracing();
    let backend = MemoryBackend::new();
    let config = Config::builder().pipeline_capacity(capacity).build();
    let session = ContainerSession::open(
        &backend,
        "/mem/live.rtdc",
        OpenMode::Create,
        SchemaValidator::standard(),
        config,
    )
    .unwrap();
    (backend, AcquisitionPipeline::start(session).unwrap())
}

fn submit_required_metadata(pipeline: &AcquisitionPipeline) {
    let values: [(&str, &str, Value); 9] = [
        ("experiment", "date", "2020-01-31".into()),
        ("experiment", "run index", 2.into()),
        ("experiment", "sample", "beads".into()),
        ("experiment", "time", "09:15:00".into()),
        ("imaging", "frame rate", 3000.0.into()),
        ("imaging", "pixel size", 0.34.into()),
        ("setup", "channel width", 30.0.into()),
        ("setup", "chip region", "channel".into()),
        ("setup", "flow rate", 0.16.into()),
    ];
    for (section, key, value) in values {
        pipeline.submit_metadata(section, key, value).unwrap();
    }
}

fn frame_batch(first_frame: i64, count: usize) -> EventBatch {
    let frames: Vec<i64> = (0..count as i64).map(|i| first_frame + i).collect();
    let images = (0..count)
        .map(|_| NdArray::new(vec![16, 32], vec![100u8; 512]).unwrap())
        .collect();
    EventBatch::new()
        .with_scalars("frame", frames)
        .with_entries("image", images)
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[test]
fn test_pipeline_writes_and_finalizes() {
    let (backend, pipeline) = setup_pipeline(2);
    submit_required_metadata(&pipeline);

    for i in 0..20 {
        pipeline.submit_events(frame_batch(i * 10, 10)).unwrap();
    }
    let report = pipeline.finish().unwrap();

    assert_eq!(report.batches_written, 20);
    assert_eq!(report.rejected_batches, 0);
    assert_eq!(report.summary.event_count, 200);

    let snapshot = backend.snapshot(Path::new("/mem/live.rtdc")).unwrap();
    assert_eq!(snapshot.dataset_length("frame"), Some(200));
    assert_eq!(snapshot.dataset_length("image"), Some(200));
    assert!(snapshot.read_only);

    // Batches land in submission order
    let frames = &snapshot.datasets["frame"];
    assert_eq!(frames.scalar_at(0), Some(Value::Int64(0)));
    assert_eq!(frames.scalar_at(199), Some(Value::Int64(199)));
}

#[test]
fn test_pipeline_fed_from_acquisition_thread() {
    let (backend, pipeline) = setup_pipeline(4);
    submit_required_metadata(&pipeline);

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..5 {
                pipeline.submit_events(frame_batch(i * 3, 3)).unwrap();
            }
        });
    });

    let report = pipeline.finish().unwrap();
    assert_eq!(report.summary.event_count, 15);
    assert_eq!(
        backend
            .snapshot(Path::new("/mem/live.rtdc"))
            .unwrap()
            .attribute("experiment", "event count"),
        Some(&Value::Int64(15))
    );
}

#[test]
fn test_pipeline_counts_rejections() {
    let (_backend, pipeline) = setup_pipeline(8);
    submit_required_metadata(&pipeline);

    pipeline.submit_events(frame_batch(0, 4)).unwrap();
    // Floats for an integer feature
    let image = NdArray::new(vec![16, 32], vec![0u8; 512]).unwrap();
    pipeline
        .submit_events(
            EventBatch::new()
                .with_scalars("frame", vec![1.0, 2.0])
                .with_entries("image", vec![image; 2]),
        )
        .unwrap();
    pipeline.submit_metadata("setup", "no such key", 1.0).unwrap();
    pipeline.submit_events(frame_batch(4, 4)).unwrap();

    let report = pipeline.finish().unwrap();
    assert_eq!(report.batches_written, 2);
    assert_eq!(report.rejected_batches, 1);
    assert_eq!(report.rejected_metadata, 1);
    assert_eq!(report.summary.event_count, 8);
}

#[test]
fn test_pipeline_incomplete_metadata_fails_finish() {
    let (backend, pipeline) = setup_pipeline(4);
    pipeline.submit_events(frame_batch(0, 2)).unwrap();

    assert!(matches!(
        pipeline.finish(),
        Err(RtdcError::IncompleteMetadata { .. })
    ));
    let snapshot = backend.snapshot(Path::new("/mem/live.rtdc")).unwrap();
    assert!(!snapshot.sealed);
}

#[test]
fn test_pipeline_stops_on_backend_error() {
    let (backend, pipeline) = setup_pipeline(1);
    submit_required_metadata(&pipeline);
    pipeline.submit_events(frame_batch(0, 2)).unwrap();

    // Whichever write comes next hits the fault and stops the worker
    backend.fail_next_write(ErrorKind::PermissionDenied);
    let _ = pipeline.submit_events(frame_batch(2, 2));

    assert!(matches!(pipeline.finish(), Err(RtdcError::BackendIo(_))));
    let snapshot = backend.snapshot(Path::new("/mem/live.rtdc")).unwrap();
    assert!(!snapshot.sealed);
}
