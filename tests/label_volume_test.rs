//! End-to-end tests for the blockwise label volume
//!
//! These exercise the full stack: block grid, compressed block store, label
//! merge semantics, purge, projection and persistence across reopen.

use labelvol::{
    parse_axistags, CompressionMethod, DataType, FsBackend, LabelVolume, MemBackend, NpyVolume,
    Region, StorageBackend, VolumeError, VolumeMeta,
};
use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;
use tempfile::TempDir;

const ERASER: u8 = 100;

/// The 5D scenario volume: shape (t, z, y, x, c) = (1, 8, 8, 8, 1) with
/// 4-voxel blocks
fn scenario_meta() -> VolumeMeta {
    VolumeMeta::new(
        vec![1, 8, 8, 8, 1],
        DataType::U8,
        parse_axistags("tzyxc").unwrap(),
        vec![1, 4, 4, 4, 1],
    )
    .unwrap()
    .with_eraser(ERASER as u64)
}

fn region(start: &[usize], stop: &[usize]) -> Region {
    Region::new(start.to_vec(), stop.to_vec()).unwrap()
}

fn single_voxel_patch(value: u8) -> ArrayD<u8> {
    ArrayD::from_elem(IxDyn(&[1, 1, 1, 1, 1]), value)
}

#[tokio::test]
async fn test_single_voxel_scenario() {
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), scenario_meta())
        .await
        .unwrap();

    // Write label 1 at voxel (0, 2, 2, 2, 0)
    let voxel = region(&[0, 2, 2, 2, 0], &[1, 3, 3, 3, 1]);
    volume.write(&voxel, &single_voxel_patch(1)).await.unwrap();

    // Exactly one block was materialized, covering [0:1, 0:4, 0:4, 0:4, 0:1]
    let clean = volume.clean_blocks();
    assert_eq!(clean.len(), 1);
    assert_eq!(clean[0], region(&[0, 0, 0, 0, 0], &[1, 4, 4, 4, 1]));

    // A full read returns a single nonzero voxel equal to 1
    let full = region(&[0, 0, 0, 0, 0], &[1, 8, 8, 8, 1]);
    let data = volume.read(&full).await.unwrap();
    assert_eq!(data.iter().filter(|&&v| v != 0).count(), 1);
    assert_eq!(data[[0, 2, 2, 2, 0]], 1);

    // Purging the label clears it; the block persists, now all zero
    volume.purge_label(1).await.unwrap();
    assert_eq!(volume.clean_blocks().len(), 1);
    let data = volume.read(&full).await.unwrap();
    assert!(data.iter().all(|&v| v == 0));

    println!("✓ single-voxel scenario: materialize, read back, purge");
}

#[tokio::test]
async fn test_round_trip_without_eraser() {
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), scenario_meta())
        .await
        .unwrap();

    // A patch free of eraser values reads back exactly
    let roi = region(&[0, 1, 1, 1, 0], &[1, 5, 5, 5, 1]);
    let values: Vec<u8> = (0..64).map(|i| (i % 4) as u8).collect();
    let patch = ArrayD::from_shape_vec(IxDyn(&[1, 4, 4, 4, 1]), values).unwrap();

    let cleaned = volume.write(&roi, &patch).await.unwrap();
    assert_eq!(cleaned, patch);
    assert_eq!(volume.read(&roi).await.unwrap(), patch);
}

#[tokio::test]
async fn test_merge_precedence_through_storage() {
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), scenario_meta())
        .await
        .unwrap();

    let roi = region(&[0, 0, 0, 0, 0], &[1, 1, 1, 3, 1]);
    let prior = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 3, 1]), vec![1u8, 2, 0]).unwrap();
    let patch = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 3, 1]), vec![0u8, 3, 5]).unwrap();

    volume.write(&roi, &prior).await.unwrap();
    let merged = volume.write(&roi, &patch).await.unwrap();

    let expected = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 3, 1]), vec![1u8, 3, 5]).unwrap();
    assert_eq!(merged, expected);
    assert_eq!(volume.read(&roi).await.unwrap(), expected);
}

#[tokio::test]
async fn test_all_default_write_materializes_no_block() {
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), scenario_meta())
        .await
        .unwrap();

    let roi = region(&[0, 0, 0, 0, 0], &[1, 8, 8, 8, 1]);
    let zeros = ArrayD::from_elem(IxDyn(&[1, 8, 8, 8, 1]), 0u8);
    volume.write(&roi, &zeros).await.unwrap();
    assert!(volume.clean_blocks().is_empty());
}

#[tokio::test]
async fn test_out_of_bounds_read_fails_fast() {
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), scenario_meta())
        .await
        .unwrap();
    let err = volume
        .read(&region(&[0, 0, 0, 0, 0], &[1, 9, 8, 8, 1]))
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::OutOfBounds(_)));
}

#[tokio::test]
async fn test_projection_of_annotated_volume() {
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), scenario_meta())
        .await
        .unwrap();

    // One labeled voxel in slice z = 5
    let voxel = region(&[0, 5, 3, 3, 0], &[1, 6, 4, 4, 1]);
    volume.write(&voxel, &single_voxel_patch(2)).await.unwrap();

    let proj = volume
        .project(&region(&[0, 0, 0, 0, 0], &[1, 1, 8, 8, 1]))
        .await
        .unwrap();
    assert_eq!(proj.shape(), &[1, 1, 8, 8, 1]);

    let labeled = proj[[0, 0, 3, 3, 0]];
    assert!(labeled > 0.0 && labeled <= 1.0);
    assert_eq!(proj[[0, 0, 0, 0, 0]], 0.0);

    // An all-zero volume projects to all zero
    volume.purge_label(2).await.unwrap();
    let proj = volume
        .project(&region(&[0, 0, 0, 0, 0], &[1, 1, 8, 8, 1]))
        .await
        .unwrap();
    assert!(proj.iter().all(|&v| v == 0.0));
}

#[tokio::test]
async fn test_persistence_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(FsBackend::new(temp_dir.path()));

    let meta = scenario_meta().with_compression(CompressionMethod::Deflate);
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::clone(&backend), meta)
        .await
        .unwrap();

    let voxel = region(&[0, 2, 2, 2, 0], &[1, 3, 3, 3, 1]);
    volume.write(&voxel, &single_voxel_patch(3)).await.unwrap();
    drop(volume);

    // Reopen from the same directory: block index is rebuilt from the
    // files on disk, existence is the only index.
    let reopened: LabelVolume<u8> = LabelVolume::open(backend).await.unwrap();
    assert_eq!(reopened.clean_blocks().len(), 1);
    let data = reopened.read(&voxel).await.unwrap();
    assert_eq!(data[[0, 0, 0, 0, 0]], 3);

    println!("✓ volume survives reopen: {}", reopened.stats().summary());
}

#[tokio::test]
async fn test_reopen_with_wrong_dtype_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(FsBackend::new(temp_dir.path()));
    let _volume: LabelVolume<u8> = LabelVolume::create(Arc::clone(&backend), scenario_meta())
        .await
        .unwrap();

    let err = LabelVolume::<u16>::open(backend).await.unwrap_err();
    assert!(matches!(err, VolumeError::DtypeMismatch { .. }));
}

#[tokio::test]
async fn test_ingest_from_npy_file() {
    let temp_dir = TempDir::new().unwrap();

    // Write a small 3D annotation volume as .npy: 8x8x8, labels 1 and 2,
    // plus one eraser pixel that must be cleaned on the way in.
    let mut payload = vec![0u8; 8 * 8 * 8];
    payload[0] = 1; // (0, 0, 0)
    payload[7 * 64 + 7 * 8 + 7] = 2; // (7, 7, 7)
    payload[3 * 64 + 3 * 8 + 3] = ERASER; // (3, 3, 3)

    let npy_path = temp_dir.path().join("annotations.npy");
    let mut header = String::from(
        "{'descr': '|u1', 'fortran_order': False, 'shape': (8, 8, 8), }",
    );
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"\x93NUMPY\x01\x00");
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(&payload);
    std::fs::write(&npy_path, bytes).unwrap();

    let source: NpyVolume<u8> = NpyVolume::open(&npy_path).await.unwrap();

    let meta = VolumeMeta::new(
        vec![8, 8, 8],
        DataType::U8,
        parse_axistags("zyx").unwrap(),
        vec![4, 4, 4],
    )
    .unwrap()
    .with_eraser(ERASER as u64);
    let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), meta)
        .await
        .unwrap();

    let max_label = volume.ingest(&source).await.unwrap();
    assert_eq!(max_label, 2);

    let data = volume
        .read(&region(&[0, 0, 0], &[8, 8, 8]))
        .await
        .unwrap();
    assert_eq!(data[[0, 0, 0]], 1);
    assert_eq!(data[[7, 7, 7]], 2);
    assert_eq!(data[[3, 3, 3]], 0);

    // Only the two blocks containing labels were materialized
    assert_eq!(volume.clean_blocks().len(), 2);

    println!("✓ ingested {} with max label {}", source.path(), max_label);
}
