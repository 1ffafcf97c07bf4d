//! 2D depth-encoded projection of label data
//!
//! Collapses all label slices along one inferred axis into a single float
//! image suitable for a 256-entry colortable: 0.0 means "no label under this
//! pixel", and nonzero values grow with the slice index of the nearest label,
//! never dropping below 1/255 so no labeled pixel rounds to zero.

use crate::error::{Result, VolumeError};
use crate::grid::{block_extent, intersecting_blocks, Region};
use crate::labels::LabelVolume;
use crate::store::BlockStore;
use crate::types::{Axis, LabelValue};
use ndarray::{ArrayD, Axis as NdAxis, IxDyn, Zip};

/// Lowest nonzero output value; keeps labeled pixels above zero under
/// 256-level quantization
const COLOR_FLOOR: f32 = 1.0 / 255.0;

/// Raw color assigned to a slice before the final inversion. Shallower
/// slices get larger values so a max projection favors them; deeper slices
/// stay above the floor.
fn slice_color(index: usize, length: usize) -> f32 {
    (1.0 - index as f32 / length as f32) * (1.0 - COLOR_FLOOR) + COLOR_FLOOR
}

impl<T: LabelValue> LabelVolume<T> {
    /// Project all label data under `region` into a 2D float image.
    ///
    /// The projection axis is inferred from the request: among the axes the
    /// request leaves at extent 1, the one that is neither the channel axis
    /// nor an extent-1 axis of the volume itself is collapsed, with priority
    /// z > y > x > t when several qualify. A request with no such axis is
    /// already 2D and is returned binarized. Requests with more than two
    /// axes of extent > 1 violate the caller contract and fail fast.
    pub async fn project(&self, region: &Region) -> Result<ArrayD<f32>> {
        project_region(self.store(), region).await
    }
}

pub(crate) async fn project_region<T: LabelValue>(
    store: &BlockStore<T>,
    region: &Region,
) -> Result<ArrayD<f32>> {
    let meta = store.meta();
    region.check_within(&meta.shape)?;

    let req_shape = region.shape();
    let fat_axes = req_shape.iter().filter(|&&extent| extent > 1).count();
    if fat_axes > 2 {
        return Err(VolumeError::Projection(format!(
            "projection of {} would have {} axes with extent > 1, at most 2 allowed",
            region, fat_axes
        )));
    }

    // Infer the projection axis from the requested shape.
    let candidates: Vec<usize> = (0..meta.num_axes())
        .filter(|&i| meta.axistags[i] != Axis::C && meta.shape[i] > 1 && req_shape[i] == 1)
        .collect();
    let proj_axis = Axis::PROJECTION_PRIORITY
        .iter()
        .find_map(|priority| candidates.iter().copied().find(|&i| meta.axistags[i] == *priority));

    let Some(proj_axis) = proj_axis else {
        // Already 2D: the projection is the plain output, made binary.
        let data = store.read(region).await?;
        return Ok(data.mapv(|v| if v.is_zero() { 0.0 } else { 1.0 }));
    };

    // Expand the request to the full extent of the projection axis.
    let projection_length = meta.shape[proj_axis];
    let mut start = region.start().to_vec();
    let mut stop = region.stop().to_vec();
    start[proj_axis] = 0;
    stop[proj_axis] = projection_length;
    let expanded = Region::new(start, stop)?;

    let mut dest = ArrayD::from_elem(IxDyn(&req_shape), 0f32);

    for coord in intersecting_blocks(&meta.block_shape, &expanded) {
        if !store.block_exists(&coord) {
            // No label data here; skipping avoids decompressing empty
            // territory entirely.
            continue;
        }
        let extent = block_extent(&meta.shape, &meta.block_shape, &coord);
        let isect = match expanded.intersection(&extent) {
            Some(isect) => isect,
            None => continue,
        };
        let data = store.read(&isect).await?;

        // Destination window: the intersection relative to the request,
        // with the projection axis collapsed.
        let mut rel_start: Vec<usize> = isect
            .start()
            .iter()
            .zip(expanded.start())
            .map(|(&a, &b)| a - b)
            .collect();
        let mut rel_stop: Vec<usize> = isect
            .stop()
            .iter()
            .zip(expanded.start())
            .map(|(&a, &b)| a - b)
            .collect();
        rel_start[proj_axis] = 0;
        rel_stop[proj_axis] = 1;
        let dest_window = Region::new(rel_start, rel_stop)?;

        let mut dest_slab = dest.slice_mut(dest_window.slice_info().as_slice());
        let mut dest_plane = dest_slab.index_axis_mut(NdAxis(proj_axis), 0);

        // Fold a max of the slice colors over this block's slab: binarized
        // voxels scaled by their slice color, merged against whatever other
        // blocks contributed. The max favors shallower slices by
        // construction of the colors.
        let base = isect.start()[proj_axis];
        let slab_len = isect.stop()[proj_axis] - base;
        for k in 0..slab_len {
            let color = slice_color(base + k, projection_length);
            let plane = data.index_axis(NdAxis(proj_axis), k);
            Zip::from(&mut dest_plane).and(&plane).for_each(|d, &v| {
                if !v.is_zero() && color > *d {
                    *d = color;
                }
            });
        }
    }

    // Re-invert the nonzero pixels so increasing values correspond to
    // increasing slice indices, keeping everything labeled strictly above
    // the floor.
    dest.mapv_inplace(|v| if v > 0.0 { (1.0 - v) + COLOR_FLOOR } else { 0.0 });
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemBackend;
    use crate::metadata::VolumeMeta;
    use crate::types::{parse_axistags, DataType};
    use std::sync::Arc;

    /// Final output value for a label whose nearest slice is `index`
    fn expected_value(index: usize, length: usize) -> f32 {
        (1.0 - slice_color(index, length)) + COLOR_FLOOR
    }

    fn region(start: &[usize], stop: &[usize]) -> Region {
        Region::new(start.to_vec(), stop.to_vec()).unwrap()
    }

    async fn volume_zyx(shape: [usize; 3]) -> LabelVolume<u8> {
        let meta = VolumeMeta::new(
            shape.to_vec(),
            DataType::U8,
            parse_axistags("zyx").unwrap(),
            vec![4, 4, 4],
        )
        .unwrap()
        .with_eraser(255);
        LabelVolume::create(Arc::new(MemBackend::new()), meta)
            .await
            .unwrap()
    }

    fn voxel(volume_shape: &[usize], at: &[usize]) -> (Region, ArrayD<u8>) {
        let stop: Vec<usize> = at.iter().map(|&c| c + 1).collect();
        let roi = Region::new(at.to_vec(), stop).unwrap();
        let patch = ArrayD::from_elem(IxDyn(&vec![1; volume_shape.len()]), 1u8);
        (roi, patch)
    }

    #[tokio::test]
    async fn test_all_zero_projects_to_zero() {
        let volume = volume_zyx([8, 8, 8]).await;
        let proj = volume.project(&region(&[0, 0, 0], &[1, 8, 8])).await.unwrap();
        assert_eq!(proj.shape(), &[1, 8, 8]);
        assert!(proj.iter().all(|&v| v == 0.0));
    }

    #[tokio::test]
    async fn test_single_slice_constant_in_unit_range() {
        let volume = volume_zyx([8, 8, 8]).await;
        // All labels live in slice z = 3
        for x in 0..8 {
            let (roi, patch) = voxel(&[8, 8, 8], &[3, 2, x]);
            volume.write(&roi, &patch).await.unwrap();
        }

        let proj = volume.project(&region(&[0, 0, 0], &[1, 8, 8])).await.unwrap();
        let expected = expected_value(3, 8);
        for x in 0..8 {
            let v = proj[[0, 2, x]];
            assert!(v > 0.0 && v <= 1.0);
            assert!((v - expected).abs() < 1e-6);
        }
        // Unlabeled pixels stay exactly zero
        assert_eq!(proj[[0, 0, 0]], 0.0);
    }

    #[tokio::test]
    async fn test_earliest_slice_wins_per_pixel() {
        let volume = volume_zyx([8, 8, 8]).await;
        // Two labels over the same (y, x) pixel, different depths
        let (roi, patch) = voxel(&[8, 8, 8], &[2, 1, 1]);
        volume.write(&roi, &patch).await.unwrap();
        let (roi, patch) = voxel(&[8, 8, 8], &[5, 1, 1]);
        volume.write(&roi, &patch).await.unwrap();

        let proj = volume.project(&region(&[0, 0, 0], &[1, 8, 8])).await.unwrap();
        assert!((proj[[0, 1, 1]] - expected_value(2, 8)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_deeper_labels_read_higher() {
        let volume = volume_zyx([8, 8, 8]).await;
        let (roi, patch) = voxel(&[8, 8, 8], &[1, 0, 0]);
        volume.write(&roi, &patch).await.unwrap();
        let (roi, patch) = voxel(&[8, 8, 8], &[6, 0, 1]);
        volume.write(&roi, &patch).await.unwrap();

        let proj = volume.project(&region(&[0, 0, 0], &[1, 8, 8])).await.unwrap();
        assert!(proj[[0, 0, 1]] > proj[[0, 0, 0]]);
    }

    #[tokio::test]
    async fn test_projection_expands_beyond_requested_slice() {
        let volume = volume_zyx([8, 8, 8]).await;
        // Label in slice z = 6, but the request pins z = 0: the projection
        // still sees it.
        let (roi, patch) = voxel(&[8, 8, 8], &[6, 4, 4]);
        volume.write(&roi, &patch).await.unwrap();

        let proj = volume.project(&region(&[0, 0, 0], &[1, 8, 8])).await.unwrap();
        assert!(proj[[0, 4, 4]] > 0.0);
    }

    #[tokio::test]
    async fn test_two_dimensional_fallback_binarizes() {
        let meta = VolumeMeta::new(
            vec![8, 8],
            DataType::U8,
            parse_axistags("yx").unwrap(),
            vec![4, 4],
        )
        .unwrap()
        .with_eraser(255);
        let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), meta)
            .await
            .unwrap();

        let roi = region(&[0, 0], &[1, 3]);
        let patch = ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![0u8, 9, 4]).unwrap();
        volume.write(&roi, &patch).await.unwrap();

        let proj = volume.project(&region(&[0, 0], &[8, 8])).await.unwrap();
        assert_eq!(proj[[0, 0]], 0.0);
        assert_eq!(proj[[0, 1]], 1.0);
        assert_eq!(proj[[0, 2]], 1.0);
    }

    #[tokio::test]
    async fn test_malformed_request_fails_fast() {
        let meta = VolumeMeta::new(
            vec![4, 8, 8, 8],
            DataType::U8,
            parse_axistags("tzyx").unwrap(),
            vec![2, 4, 4, 4],
        )
        .unwrap()
        .with_eraser(255);
        let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), meta)
            .await
            .unwrap();

        let err = volume
            .project(&region(&[0, 0, 0, 0], &[4, 8, 8, 1]))
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::Projection(_)));
    }

    #[tokio::test]
    async fn test_channel_axis_never_projected() {
        // Request leaves both z and c at extent 1; z must be chosen.
        let meta = VolumeMeta::new(
            vec![8, 8, 8, 2],
            DataType::U8,
            parse_axistags("zyxc").unwrap(),
            vec![4, 4, 4, 2],
        )
        .unwrap()
        .with_eraser(255);
        let volume: LabelVolume<u8> = LabelVolume::create(Arc::new(MemBackend::new()), meta)
            .await
            .unwrap();

        let (roi, patch) = voxel(&[8, 8, 8, 2], &[5, 3, 3, 0]);
        volume.write(&roi, &patch).await.unwrap();

        let proj = volume
            .project(&region(&[0, 0, 0, 0], &[1, 8, 8, 1]))
            .await
            .unwrap();
        assert_eq!(proj.shape(), &[1, 8, 8, 1]);
        assert!((proj[[0, 3, 3, 0]] - expected_value(5, 8)).abs() < 1e-6);
    }
}
