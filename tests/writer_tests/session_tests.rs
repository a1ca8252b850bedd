//! Tests for ContainerSession
//!
//! These tests verify:
//! - The end-to-end write scenario (metadata, two batches, finalize)
//! - Metadata round-trip, idempotence and conflicts
//! - All-or-nothing batches and counter alignment
//! - Finalize preconditions and the closed/failed states
//! - Empty contour entries on both backends

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use rtdc::registry::{Feature, FeatureRegistry};
use rtdc::schema::{MetadataKey, MetadataSchema};
use rtdc::writer::{ContainerSession, EventBatch, OpenMode, SessionState};
use rtdc::{
    ArrayData, Config, ContainerHandle, FileBackend, MemoryBackend, NdArray, RtdcError,
    SchemaValidator, StorageBackend, Value, ValueType,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Registry with `area` (scalar) and `image` (2-D per event); schema
/// requiring `setup:channel_width`
fn scoped_validator() -> SchemaValidator {
    let features = FeatureRegistry::new([
        Feature::scalar("area", ValueType::Float64, "Area"),
        Feature::image("image", ValueType::UInt8, "Image"),
    ])
    .unwrap();
    let metadata = MetadataSchema::new([
        MetadataKey::new("setup", "channel_width", ValueType::Float64).required(),
        MetadataKey::new("setup", "rate", ValueType::Float64),
    ])
    .unwrap();
    SchemaValidator::new(Arc::new(features), Arc::new(metadata))
}

fn setup_session() -> (MemoryBackend, ContainerSession<MemoryBackend>) {
    let backend = MemoryBackend::new();
    let session = ContainerSession::open(
        &backend,
        "/mem/test.rtdc",
        OpenMode::Create,
        scoped_validator(),
        Config::default(),
    )
    .unwrap();
    (backend, session)
}

/// Registry with `area` and `contour`; schema requiring the event count
fn counted_validator() -> SchemaValidator {
    let features = FeatureRegistry::new([
        Feature::scalar("area", ValueType::Float64, "Area"),
        Feature::contour("contour", ValueType::Int64, "Contour"),
    ])
    .unwrap();
    let metadata = MetadataSchema::new([
        MetadataKey::new("experiment", "event count", ValueType::Int64).required(),
    ])
    .unwrap();
    SchemaValidator::new(Arc::new(features), Arc::new(metadata))
}

fn contour(points: usize) -> NdArray {
    let coords: Vec<i64> = (0..points as i64 * 2).collect();
    NdArray::new(vec![points, 2], coords).unwrap()
}

/// Three events, the middle one without a detected contour
fn contours_with_placeholder() -> Vec<NdArray> {
    vec![contour(4), contour(0), contour(3)]
}

fn write_placeholder_contours<B: StorageBackend>(backend: &B, path: &Path) {
    let config = Config::builder().read_only_on_finalize(false).build();
    let mut session =
        ContainerSession::open(backend, path, OpenMode::Create, counted_validator(), config)
            .unwrap();
    session
        .write_events(
            &EventBatch::new()
                .with_scalars("area", vec![1.0, 0.0, 3.0])
                .with_entries("contour", contours_with_placeholder()),
        )
        .unwrap();
    session
        .write_events(
            &EventBatch::new()
                .with_scalars("area", vec![0.0])
                .with_entries("contour", vec![contour(0)]),
        )
        .unwrap();

    let summary = session.finalize().unwrap();
    assert_eq!(summary.event_count, 4);
    assert_eq!(summary.datasets.get("contour"), Some(&4));
}

fn assert_placeholder_contours<H: ContainerHandle>(handle: &H) {
    let stored = handle.read_dataset("contour").unwrap();
    assert_eq!(stored.len(), 4);

    let mut expected = contours_with_placeholder();
    expected.push(contour(0));
    let arrays = stored.to_arrays().unwrap();
    assert_eq!(arrays, expected);
    assert_eq!(arrays[1].shape(), &[0, 2]);
    assert_eq!(arrays[3].shape(), &[0, 2]);
}

fn batch(count: usize) -> EventBatch {
    let area: Vec<f64> = (0..count).map(|i| i as f64 * 0.5).collect();
    let images = (0..count)
        .map(|_| NdArray::new(vec![8, 10], vec![0u8; 80]).unwrap())
        .collect();
    EventBatch::new()
        .with_scalars("area", area)
        .with_entries("image", images)
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[test]
fn test_two_batches_then_finalize() {
    let (backend, mut session) = setup_session();

    session.write_metadata("setup", "channel_width", 20.0).unwrap();
    session.write_events(&batch(100)).unwrap();
    session.write_events(&batch(50)).unwrap();
    assert_eq!(session.state(), SessionState::Writing);

    let summary = session.finalize().unwrap();
    assert_eq!(session.state(), SessionState::Finalized);
    assert_eq!(summary.event_count, 150);
    assert_eq!(summary.datasets.get("area"), Some(&150));
    assert_eq!(summary.datasets.get("image"), Some(&150));

    let snapshot = backend.snapshot(Path::new("/mem/test.rtdc")).unwrap();
    assert_eq!(snapshot.dataset_length("area"), Some(150));
    assert_eq!(snapshot.dataset_length("image"), Some(150));
    assert!(snapshot.sealed);
    assert!(snapshot.read_only);
}

#[test]
fn test_create_existing_fails() {
    let (backend, _session) = setup_session();

    let result = ContainerSession::open(
        &backend,
        "/mem/test.rtdc",
        OpenMode::Create,
        scoped_validator(),
        Config::default(),
    );
    assert!(matches!(result, Err(RtdcError::ContainerExists(_))));
}

// =============================================================================
// Metadata Tests
// =============================================================================

#[test]
fn test_metadata_round_trip() {
    let (_backend, mut session) = setup_session();

    session.write_metadata("setup", "rate", 42.0).unwrap();
    assert_eq!(session.get_attribute("setup", "rate"), Some(Value::Float64(42.0)));
}

#[test]
fn test_metadata_idempotent() {
    let (_backend, mut session) = setup_session();

    session.write_metadata("setup", "rate", 42.0).unwrap();
    let before = session.metadata().clone();
    session.write_metadata("setup", "rate", 42.0).unwrap();

    assert_eq!(session.metadata(), &before);
    assert_eq!(session.state(), SessionState::Writing);
}

#[test]
fn test_metadata_conflict_fails_session() {
    let (_backend, mut session) = setup_session();

    session.write_metadata("setup", "rate", 42.0).unwrap();
    let result = session.write_metadata("setup", "rate", 43.0);

    assert!(matches!(result, Err(RtdcError::MetadataConflict { .. })));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.handle().is_none());
}

#[test]
fn test_invalid_metadata_is_recoverable() {
    let (_backend, mut session) = setup_session();

    let err = session.write_metadata("setup", "rate", "fast").unwrap_err();
    assert!(matches!(err, RtdcError::TypeMismatch { .. }));
    assert!(err.is_recoverable());
    assert!(matches!(
        session.write_metadata("imaging", "frame rate", 2000.0),
        Err(RtdcError::UnknownSection(_))
    ));
    assert_eq!(session.state(), SessionState::Open);

    session.write_metadata("setup", "rate", 42.0).unwrap();
}

// =============================================================================
// Batch Tests
// =============================================================================

#[test]
fn test_invalid_batch_appends_nothing() {
    let (backend, mut session) = setup_session();
    session.write_events(&batch(10)).unwrap();

    // Nine valid rows and one image of the wrong shape
    let mut images: Vec<NdArray> = (0..9)
        .map(|_| NdArray::new(vec![8, 10], vec![0u8; 80]).unwrap())
        .collect();
    images.push(NdArray::new(vec![10, 8], vec![0u8; 80]).unwrap());
    let bad = EventBatch::new()
        .with_scalars("area", vec![1.0; 10])
        .with_entries("image", images);

    let result = session.write_events(&bad);
    assert!(matches!(result, Err(RtdcError::ShapeMismatch { .. })));
    assert_eq!(session.state(), SessionState::Writing);
    assert_eq!(session.event_count(), 10);

    let snapshot = backend.snapshot(Path::new("/mem/test.rtdc")).unwrap();
    assert_eq!(snapshot.dataset_length("area"), Some(10));
    assert_eq!(snapshot.dataset_length("image"), Some(10));

    // The corrected batch goes through
    session.write_events(&batch(10)).unwrap();
    assert_eq!(session.event_count(), 20);
}

#[test]
fn test_unequal_columns_rejected() {
    let (_backend, mut session) = setup_session();
    let images = vec![NdArray::new(vec![8, 10], vec![0u8; 80]).unwrap()];
    let bad = EventBatch::new()
        .with_scalars("area", vec![1.0, 2.0])
        .with_entries("image", images);

    assert!(matches!(
        session.write_events(&bad),
        Err(RtdcError::BatchLengthMismatch { .. })
    ));
    assert_eq!(session.event_count(), 0);
}

#[test]
fn test_feature_set_fixed_by_first_batch() {
    let (_backend, mut session) = setup_session();
    session.write_events(&batch(3)).unwrap();

    let only_area = EventBatch::new().with_scalars("area", vec![1.0]);
    match session.write_events(&only_area) {
        Err(RtdcError::FeatureSetMismatch { missing, unexpected }) => {
            assert_eq!(missing, vec!["image".to_string()]);
            assert!(unexpected.is_empty());
        }
        other => panic!("expected FeatureSetMismatch, got {:?}", other),
    }
    assert_eq!(session.feature_count("area"), Some(3));
    assert_eq!(session.feature_count("image"), Some(3));
}

#[test]
fn test_declare_features() {
    let (_backend, mut session) = setup_session();

    assert!(matches!(
        session.declare_features(["area", "volume"]),
        Err(RtdcError::UnknownFeature(_))
    ));
    session.declare_features(["area"]).unwrap();

    assert!(matches!(
        session.write_events(&batch(2)),
        Err(RtdcError::FeatureSetMismatch { .. })
    ));
    session
        .write_events(&EventBatch::new().with_scalars("area", vec![1.0, 2.0]))
        .unwrap();
}

#[test]
fn test_image_shape_fixed_across_batches() {
    let (_backend, mut session) = setup_session();
    session.write_events(&batch(2)).unwrap();
    assert_eq!(
        session.signature("image").and_then(|s| s.fixed_shape()),
        Some(vec![8, 10])
    );

    let other_shape = EventBatch::new()
        .with_scalars("area", vec![1.0])
        .with_entries("image", vec![NdArray::new(vec![4, 4], vec![0u8; 16]).unwrap()]);
    assert!(matches!(
        session.write_events(&other_shape),
        Err(RtdcError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_empty_batch_is_noop() {
    let (_backend, mut session) = setup_session();
    session.write_events(&EventBatch::new()).unwrap();

    assert_eq!(session.state(), SessionState::Open);
    assert!(session.feature_set().is_none());
}

// =============================================================================
// Finalize Tests
// =============================================================================

#[test]
fn test_finalize_missing_required_metadata() {
    let (backend, mut session) = setup_session();
    session.write_events(&batch(5)).unwrap();

    match session.finalize() {
        Err(RtdcError::IncompleteMetadata { missing }) => {
            assert_eq!(missing, vec!["setup:channel_width".to_string()]);
        }
        other => panic!("expected IncompleteMetadata, got {:?}", other),
    }

    // Still open and writable
    assert_eq!(session.state(), SessionState::Writing);
    assert!(session.handle().is_some());
    let snapshot = backend.snapshot(Path::new("/mem/test.rtdc")).unwrap();
    assert!(!snapshot.sealed);

    session.write_metadata("setup", "channel_width", 20.0).unwrap();
    session.finalize().unwrap();
}

#[test]
fn test_writes_after_finalize_fail() {
    let (_backend, mut session) = setup_session();
    session.write_metadata("setup", "channel_width", 20.0).unwrap();
    session.finalize().unwrap();

    assert!(matches!(session.write_events(&batch(1)), Err(RtdcError::SessionClosed)));
    assert!(matches!(
        session.write_metadata("setup", "rate", 1.0),
        Err(RtdcError::SessionClosed)
    ));
    assert!(matches!(session.finalize(), Err(RtdcError::SessionClosed)));
}

#[test]
fn test_finalize_without_read_only() {
    let backend = MemoryBackend::new();
    let config = Config::builder().read_only_on_finalize(false).build();
    let mut session = ContainerSession::open(
        &backend,
        "/mem/a.rtdc",
        OpenMode::Create,
        scoped_validator(),
        config,
    )
    .unwrap();
    session.write_metadata("setup", "channel_width", 20.0).unwrap();
    let summary = session.finalize().unwrap();

    assert!(!summary.read_only);
    let snapshot = backend.snapshot(Path::new("/mem/a.rtdc")).unwrap();
    assert!(snapshot.sealed);
    assert!(!snapshot.read_only);
}

#[test]
fn test_finalize_records_event_count() {
    let backend = MemoryBackend::new();
    let mut session = ContainerSession::open(
        &backend,
        "/mem/std.rtdc",
        OpenMode::Create,
        SchemaValidator::standard(),
        Config::default(),
    )
    .unwrap();

    for (section, key, value) in [
        ("experiment", "date", Value::from("2017-02-08")),
        ("experiment", "run index", Value::from(1)),
        ("experiment", "sample", Value::from("blood")),
        ("experiment", "time", Value::from("14:52:13")),
        ("imaging", "frame rate", Value::from(2000)),
        ("imaging", "pixel size", Value::from(0.34)),
        ("setup", "channel width", Value::from(20)),
        ("setup", "chip region", Value::from("Channel")),
        ("setup", "flow rate", Value::from(0.04)),
    ] {
        session.write_metadata(section, key, value).unwrap();
    }
    session
        .write_events(&EventBatch::new().with_scalars("deform", vec![0.01, 0.02, 0.03]))
        .unwrap();

    let summary = session.finalize().unwrap();
    assert_eq!(summary.metadata_keys, 10);

    let snapshot = backend.snapshot(Path::new("/mem/std.rtdc")).unwrap();
    assert_eq!(snapshot.attribute("experiment", "event count"), Some(&Value::Int64(3)));
    assert_eq!(snapshot.attribute("setup", "chip region"), Some(&Value::from("channel")));
    assert_eq!(snapshot.attribute("imaging", "frame rate"), Some(&Value::Float64(2000.0)));
}

#[test]
fn test_required_event_count_satisfied_at_finalize() {
    let backend = MemoryBackend::new();
    let mut session = ContainerSession::open(
        &backend,
        "/mem/count.rtdc",
        OpenMode::Create,
        counted_validator(),
        Config::default(),
    )
    .unwrap();
    session
        .write_events(
            &EventBatch::new()
                .with_scalars("area", vec![1.0, 2.0, 3.0])
                .with_entries("contour", vec![contour(2), contour(3), contour(4)]),
        )
        .unwrap();

    let summary = session.finalize().unwrap();
    assert_eq!(summary.event_count, 3);
    let snapshot = backend.snapshot(Path::new("/mem/count.rtdc")).unwrap();
    assert_eq!(snapshot.attribute("experiment", "event count"), Some(&Value::Int64(3)));
}

#[test]
fn test_required_event_count_without_recording() {
    let backend = MemoryBackend::new();
    let config = Config::builder().record_event_count(false).build();
    let mut session = ContainerSession::open(
        &backend,
        "/mem/count.rtdc",
        OpenMode::Create,
        counted_validator(),
        config,
    )
    .unwrap();
    session
        .write_events(&EventBatch::single("area", 1.0).with_event("contour", contour(2)))
        .unwrap();

    match session.finalize() {
        Err(RtdcError::IncompleteMetadata { missing }) => {
            assert_eq!(missing, vec!["experiment:event count".to_string()]);
        }
        other => panic!("expected IncompleteMetadata, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Writing);

    session.write_metadata("experiment", "event count", 1).unwrap();
    assert_eq!(session.finalize().unwrap().event_count, 1);
}

// =============================================================================
// Single Event Tests
// =============================================================================

#[test]
fn test_single_events() {
    let (backend, mut session) = setup_session();
    session.write_metadata("setup", "channel_width", 20.0).unwrap();

    for i in 0..3 {
        let image = NdArray::new(vec![8, 10], vec![i as u8; 80]).unwrap();
        let event = EventBatch::single("area", i as f64).with_event("image", image);
        session.write_events(&event).unwrap();
    }

    assert_eq!(session.event_count(), 3);
    assert_eq!(session.batches_written(), 3);
    session.finalize().unwrap();

    let snapshot = backend.snapshot(Path::new("/mem/test.rtdc")).unwrap();
    assert_eq!(
        snapshot.datasets["area"].data(),
        &ArrayData::Float64(vec![0.0, 1.0, 2.0])
    );
    assert_eq!(snapshot.dataset_length("image"), Some(3));
}

#[test]
fn test_single_event_type_checked() {
    let (_backend, mut session) = setup_session();
    let image = NdArray::new(vec![8, 10], vec![0u8; 80]).unwrap();

    let result = session.write_events(&EventBatch::single("area", 1i64).with_event("image", image));
    assert!(matches!(result, Err(RtdcError::TypeMismatch { .. })));
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(session.event_count(), 0);
}

// =============================================================================
// Placeholder Entry Tests
// =============================================================================

#[test]
fn test_empty_contour_entries_memory_backend() {
    let backend = MemoryBackend::new();
    let path = Path::new("/mem/contours.rtdc");
    write_placeholder_contours(&backend, path);

    let handle = backend.open(path).unwrap();
    assert_placeholder_contours(&handle);
}

#[test]
fn test_empty_contour_entries_file_backend() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("contours.rtdc");
    let backend = FileBackend::default();
    write_placeholder_contours(&backend, &path);

    let handle = backend.open(&path).unwrap();
    assert_placeholder_contours(&handle);
    drop(handle);

    // Adopted on append, including the empty entries
    let mut session = ContainerSession::open(
        &backend,
        &path,
        OpenMode::Append,
        counted_validator(),
        Config::default(),
    )
    .unwrap();
    assert_eq!(session.event_count(), 4);
    session
        .write_events(&EventBatch::single("area", 0.0).with_event("contour", contour(0)))
        .unwrap();
    assert_eq!(session.finalize().unwrap().event_count, 5);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_backend_error_fails_session() {
    let (backend, mut session) = setup_session();
    session.write_events(&batch(5)).unwrap();

    backend.fail_next_write(ErrorKind::WriteZero);
    let result = session.write_events(&batch(5));

    assert!(matches!(result, Err(RtdcError::BackendIo(_))));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.handle().is_none());

    assert!(matches!(session.write_events(&batch(1)), Err(RtdcError::SessionFailed)));
    assert!(matches!(session.finalize(), Err(RtdcError::SessionFailed)));
    session.close_discard().unwrap();

    let snapshot = backend.snapshot(Path::new("/mem/test.rtdc")).unwrap();
    assert_eq!(snapshot.dataset_length("area"), Some(5));
    assert!(!snapshot.sealed);
}

#[test]
fn test_close_discard_leaves_container_unsealed() {
    let (backend, mut session) = setup_session();
    session.write_events(&batch(3)).unwrap();
    session.close_discard().unwrap();

    let snapshot = backend.snapshot(Path::new("/mem/test.rtdc")).unwrap();
    assert_eq!(snapshot.dataset_length("area"), Some(3));
    assert!(!snapshot.sealed);
}

#[test]
fn test_finalize_backend_fault_releases_container() {
    let (backend, mut session) = setup_session();
    session.write_metadata("setup", "channel_width", 20.0).unwrap();
    session.write_events(&batch(4)).unwrap();

    backend.fail_next_write(ErrorKind::WriteZero);
    assert!(matches!(session.finalize(), Err(RtdcError::BackendIo(_))));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.handle().is_none());

    let snapshot = backend.snapshot(Path::new("/mem/test.rtdc")).unwrap();
    assert!(!snapshot.sealed);

    // Released, so the container can be resumed and completed
    let mut resumed = ContainerSession::open(
        &backend,
        "/mem/test.rtdc",
        OpenMode::Append,
        scoped_validator(),
        Config::default(),
    )
    .unwrap();
    assert_eq!(resumed.event_count(), 4);
    assert_eq!(resumed.finalize().unwrap().event_count, 4);
}
