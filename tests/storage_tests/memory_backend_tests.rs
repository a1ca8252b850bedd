//! Tests for the in-memory backend
//!
//! These tests verify:
//! - Create/open semantics (exists, not found, read-only, one handle at a time)
//! - Dataset append with dtype and layout checks
//! - All-or-nothing batch append
//! - Attributes and sealing
//! - Fault injection

use std::io::ErrorKind;
use std::path::Path;

use rtdc::storage::{Chunk, ContainerHandle, Entries, Layout, MemoryBackend, StorageBackend};
use rtdc::{NdArray, RtdcError, Value, ValueType};

// =============================================================================
// Helper Functions
// =============================================================================

fn scalars(values: &[f64]) -> Chunk {
    Chunk::scalars(values.to_vec().into())
}

fn images(count: usize, rows: usize, cols: usize) -> Chunk {
    let arrays: Vec<NdArray> = (0..count)
        .map(|_| NdArray::new(vec![rows, cols], vec![7u8; rows * cols]).unwrap())
        .collect();
    Chunk::fixed(ValueType::UInt8, &arrays).unwrap()
}

fn contours(points: &[usize]) -> Chunk {
    let arrays: Vec<NdArray> = points
        .iter()
        .map(|&n| NdArray::new(vec![n, 2], vec![0i64; n * 2]).unwrap())
        .collect();
    Chunk::ragged(ValueType::Int64, &arrays).unwrap()
}

// =============================================================================
// Create / Open Tests
// =============================================================================

#[test]
fn test_create_then_exists() {
    let backend = MemoryBackend::new();
    let path = Path::new("/mem/a.rtdc");

    assert!(!backend.exists(path));
    backend.create(path).unwrap();
    assert!(backend.exists(path));
}

#[test]
fn test_create_existing_fails() {
    let backend = MemoryBackend::new();
    let path = Path::new("/mem/a.rtdc");
    backend.create(path).unwrap();

    assert!(matches!(backend.create(path), Err(RtdcError::ContainerExists(_))));
}

#[test]
fn test_open_missing_fails() {
    let backend = MemoryBackend::new();
    assert!(matches!(
        backend.open(Path::new("/mem/missing.rtdc")),
        Err(RtdcError::ContainerNotFound(_))
    ));
}

#[test]
fn test_open_read_only_fails() {
    let backend = MemoryBackend::new();
    let path = Path::new("/mem/a.rtdc");
    let mut handle = backend.create(path).unwrap();
    handle.seal(true).unwrap();
    handle.close().unwrap();

    match backend.open(path) {
        Err(RtdcError::BackendIo(e)) => assert_eq!(e.kind(), ErrorKind::PermissionDenied),
        other => panic!("expected PermissionDenied, got {:?}", other.map(|_| ())),
    }

    assert!(backend.set_writable(path));
    assert!(backend.open(path).is_ok());
}

#[test]
fn test_open_while_handle_held_is_busy() {
    let backend = MemoryBackend::new();
    let path = Path::new("/mem/a.rtdc");
    let mut writer = backend.create(path).unwrap();

    assert!(matches!(backend.open(path), Err(RtdcError::ContainerBusy(_))));

    writer.append_dataset("area_um", &scalars(&[1.0, 2.0])).unwrap();
    writer.close().unwrap();

    let reader = backend.open(path).unwrap();
    assert_eq!(reader.get_dataset_length("area_um"), Some(2));
    assert!(matches!(backend.open(path), Err(RtdcError::ContainerBusy(_))));

    drop(reader);
    assert!(backend.open(path).is_ok());
}

// =============================================================================
// Dataset Tests
// =============================================================================

#[test]
fn test_append_and_read_back() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();

    handle.append_dataset("area_um", &scalars(&[1.0, 2.0])).unwrap();
    handle.append_dataset("area_um", &scalars(&[3.0])).unwrap();

    assert_eq!(handle.get_dataset_length("area_um"), Some(3));
    let chunk = handle.read_dataset("area_um").unwrap();
    assert_eq!(chunk.scalar_at(2), Some(Value::Float64(3.0)));
    assert_eq!(handle.get_dataset_length("deform"), None);
}

#[test]
fn test_fixed_layout_enforced() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();

    handle.append_dataset("image", &images(2, 4, 5)).unwrap();
    let info = handle.dataset_info("image").unwrap();
    assert_eq!(info.layout, Layout::Fixed(vec![4, 5]));

    let result = handle.append_dataset("image", &images(1, 5, 4));
    assert!(matches!(result, Err(RtdcError::ShapeMismatch { .. })));
    assert_eq!(handle.get_dataset_length("image"), Some(2));
}

#[test]
fn test_dtype_enforced() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();

    handle.append_dataset("frame", &Chunk::scalars(vec![1i64, 2].into())).unwrap();
    let result = handle.append_dataset("frame", &scalars(&[3.0]));
    assert!(matches!(result, Err(RtdcError::TypeMismatch { .. })));
}

#[test]
fn test_ragged_side_channel() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();

    handle.append_dataset("contour", &contours(&[3, 5])).unwrap();
    handle.append_dataset("contour", &contours(&[4])).unwrap();

    let chunk = handle.read_dataset("contour").unwrap();
    assert_eq!(
        chunk.entries(),
        &Entries::Ragged { shapes: vec![vec![3, 2], vec![5, 2], vec![4, 2]] }
    );
    let arrays = chunk.to_arrays().unwrap();
    assert_eq!(arrays[1].shape(), &[5, 2]);
}

#[test]
fn test_batch_is_all_or_nothing() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();
    handle
        .append_batch(&[
            ("area_um".to_string(), scalars(&[1.0])),
            ("image".to_string(), images(1, 2, 2)),
        ])
        .unwrap();

    let result = handle.append_batch(&[
        ("area_um".to_string(), scalars(&[2.0])),
        ("image".to_string(), images(1, 3, 3)),
    ]);

    assert!(result.is_err());
    assert_eq!(handle.get_dataset_length("area_um"), Some(1));
    assert_eq!(handle.get_dataset_length("image"), Some(1));
}

// =============================================================================
// Attribute and Seal Tests
// =============================================================================

#[test]
fn test_attributes() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();

    handle.set_attribute("setup", "rate", &Value::Float64(42.0)).unwrap();
    assert_eq!(handle.get_attribute("setup", "rate"), Some(Value::Float64(42.0)));
    assert_eq!(handle.get_attribute("setup", "other"), None);
    assert_eq!(handle.attributes().len(), 1);
}

#[test]
fn test_snapshot_after_close() {
    let backend = MemoryBackend::new();
    let path = Path::new("/mem/a.rtdc");
    let mut handle = backend.create(path).unwrap();
    handle.append_dataset("area_um", &scalars(&[1.0, 2.0])).unwrap();
    handle.seal(false).unwrap();
    handle.close().unwrap();

    let snapshot = backend.snapshot(path).unwrap();
    assert_eq!(snapshot.dataset_length("area_um"), Some(2));
    assert!(snapshot.sealed);
    assert!(!snapshot.read_only);
}

#[test]
fn test_write_after_seal_unseals() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();
    handle.seal(false).unwrap();
    assert!(handle.is_sealed());

    handle.append_dataset("area_um", &scalars(&[1.0])).unwrap();
    assert!(!handle.is_sealed());
}

// =============================================================================
// Fault Injection Tests
// =============================================================================

#[test]
fn test_injected_fault_fails_once() {
    let backend = MemoryBackend::new();
    let mut handle = backend.create(Path::new("/mem/a.rtdc")).unwrap();

    backend.fail_next_write(ErrorKind::WriteZero);
    match handle.append_dataset("area_um", &scalars(&[1.0])) {
        Err(RtdcError::BackendIo(e)) => assert_eq!(e.kind(), ErrorKind::WriteZero),
        other => panic!("expected BackendIo, got {:?}", other),
    }
    assert_eq!(handle.get_dataset_length("area_um"), None);

    handle.append_dataset("area_um", &scalars(&[1.0])).unwrap();
    assert_eq!(handle.get_dataset_length("area_um"), Some(1));
}
