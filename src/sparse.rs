//! Sparse in-memory label store
//!
//! A self-contained alternative to the block store for volumes small enough
//! to stay resident: a dense array of current values plus an ordered index
//! of nonzero coordinates, kept in sync under a single lock. The maximum
//! label is recomputed by a full scan on every write; that O(n) cost per
//! write is an accepted scaling limit of this store, not of the blockwise
//! engine.

use crate::error::{Result, VolumeError};
use crate::grid::Region;
use crate::labels::DirtyListener;
use crate::types::LabelValue;
use ndarray::{ArrayD, Dimension, IxDyn};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

struct SparseState<T> {
    dense: ArrayD<T>,
    nonzero: BTreeMap<usize, T>,
    max_label: T,
}

/// Fully in-memory label array with an ordered nonzero index
pub struct SparseLabelArray<T: LabelValue> {
    shape: Vec<usize>,
    eraser: T,
    state: Mutex<SparseState<T>>,
    listener: RwLock<Option<Arc<dyn DirtyListener>>>,
}

/// Flattened row-major index of a coordinate
fn ravel(coord: &[usize], shape: &[usize]) -> usize {
    coord
        .iter()
        .zip(shape)
        .fold(0, |acc, (&c, &extent)| acc * extent + c)
}

impl<T: LabelValue> SparseLabelArray<T> {
    pub fn new(shape: Vec<usize>, eraser: T) -> Result<Self> {
        if shape.is_empty() {
            return Err(VolumeError::InvalidDimensions(
                "Volume must have at least one axis".to_string(),
            ));
        }
        if eraser.is_zero() {
            return Err(VolumeError::Configuration(
                "Eraser value must be nonzero".to_string(),
            ));
        }
        let dense = ArrayD::from_elem(IxDyn(&shape), T::zero());
        Ok(Self {
            shape,
            eraser,
            state: Mutex::new(SparseState {
                dense,
                nonzero: BTreeMap::new(),
                max_label: T::zero(),
            }),
            listener: RwLock::new(None),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn eraser(&self) -> T {
        self.eraser
    }

    /// Register the dirty-notification receiver
    pub fn set_dirty_listener(&self, listener: Arc<dyn DirtyListener>) {
        *self.listener.write() = Some(listener);
    }

    fn notify_dirty(&self, region: &Region) {
        if let Some(listener) = self.listener.read().as_ref() {
            listener.mark_dirty(region);
        }
    }

    /// Read current content for `region`
    pub fn read(&self, region: &Region) -> Result<ArrayD<T>> {
        region.check_within(&self.shape)?;
        let state = self.state.lock();
        Ok(state.dense.slice(region.slice_info().as_slice()).to_owned())
    }

    /// Apply a label patch: zeros leave content unchanged, nonzero values
    /// overwrite, the eraser clears to zero. Dense array and nonzero index
    /// are updated together under the lock.
    pub fn write(&self, region: &Region, patch: &ArrayD<T>) -> Result<()> {
        region.check_within(&self.shape)?;
        if patch.shape() != region.shape().as_slice() {
            return Err(VolumeError::InvalidDimensions(format!(
                "Patch of shape {:?} does not cover region {}",
                patch.shape(),
                region
            )));
        }

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for (idx, &p) in patch.indexed_iter() {
                if p.is_zero() {
                    continue;
                }
                let coord: Vec<usize> = idx
                    .slice()
                    .iter()
                    .zip(region.start())
                    .map(|(&i, &s)| i + s)
                    .collect();
                let flat = ravel(&coord, &self.shape);
                if p == self.eraser {
                    state.dense[IxDyn(&coord)] = T::zero();
                    state.nonzero.remove(&flat);
                } else {
                    state.dense[IxDyn(&coord)] = p;
                    state.nonzero.insert(flat, p);
                }
            }
            state.max_label = state.dense.iter().fold(T::zero(), |m, &v| m.max(v));
        }

        self.notify_dirty(region);
        Ok(())
    }

    /// Remove one label value and renumber greater labels downward, exactly
    /// like the blockwise purge but fully synchronous. The nonzero index is
    /// renumbered together with the dense array.
    pub fn delete_label(&self, label: T) {
        if label.is_zero() {
            return;
        }

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for v in state.dense.iter_mut() {
                if *v == label {
                    *v = T::zero();
                } else if *v > label {
                    *v = *v - T::one();
                }
            }
            state.nonzero = state
                .dense
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_zero())
                .map(|(flat, &v)| (flat, v))
                .collect();
            state.max_label = state.dense.iter().fold(T::zero(), |m, &v| m.max(v));
        }

        self.notify_dirty(&Region::from_shape(&self.shape));
    }

    /// Values of all nonzero entries, in flattened-coordinate order
    pub fn nonzero_values(&self) -> Vec<T> {
        self.state.lock().nonzero.values().copied().collect()
    }

    /// Flattened coordinates of all nonzero entries, ordered
    pub fn nonzero_coordinates(&self) -> Vec<usize> {
        self.state.lock().nonzero.keys().copied().collect()
    }

    /// Current maximum label value
    pub fn max_label(&self) -> T {
        self.state.lock().max_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERASER: u8 = 255;

    fn array(shape: &[usize]) -> SparseLabelArray<u8> {
        SparseLabelArray::new(shape.to_vec(), ERASER).unwrap()
    }

    fn region(start: &[usize], stop: &[usize]) -> Region {
        Region::new(start.to_vec(), stop.to_vec()).unwrap()
    }

    fn patch(shape: &[usize], values: &[u8]) -> ArrayD<u8> {
        ArrayD::from_shape_vec(IxDyn(shape), values.to_vec()).unwrap()
    }

    #[test]
    fn test_ravel_row_major() {
        assert_eq!(ravel(&[0, 0], &[4, 5]), 0);
        assert_eq!(ravel(&[1, 2], &[4, 5]), 7);
        assert_eq!(ravel(&[3, 4], &[4, 5]), 19);
    }

    #[test]
    fn test_write_read_and_index() {
        let arr = array(&[4, 4]);
        arr.write(&region(&[1, 1], &[2, 3]), &patch(&[1, 2], &[3, 0]))
            .unwrap();

        let read = arr.read(&region(&[0, 0], &[4, 4])).unwrap();
        assert_eq!(read[[1, 1]], 3);
        assert_eq!(read[[1, 2]], 0);

        assert_eq!(arr.nonzero_coordinates(), vec![5]);
        assert_eq!(arr.nonzero_values(), vec![3]);
        assert_eq!(arr.max_label(), 3);
    }

    #[test]
    fn test_zero_patch_preserves_content() {
        let arr = array(&[4]);
        arr.write(&region(&[0], &[4]), &patch(&[4], &[1, 2, 0, 0]))
            .unwrap();
        arr.write(&region(&[0], &[4]), &patch(&[4], &[0, 0, 0, 0]))
            .unwrap();
        assert_eq!(
            arr.read(&region(&[0], &[4])).unwrap(),
            patch(&[4], &[1, 2, 0, 0])
        );
    }

    #[test]
    fn test_eraser_clears_and_unindexes() {
        let arr = array(&[4]);
        arr.write(&region(&[0], &[4]), &patch(&[4], &[5, 5, 0, 0]))
            .unwrap();
        arr.write(&region(&[0], &[2]), &patch(&[2], &[ERASER, 0]))
            .unwrap();

        assert_eq!(
            arr.read(&region(&[0], &[4])).unwrap(),
            patch(&[4], &[0, 5, 0, 0])
        );
        assert_eq!(arr.nonzero_coordinates(), vec![1]);
        assert_eq!(arr.max_label(), 5);
    }

    #[test]
    fn test_delete_label_renumbers_and_stays_in_sync() {
        let arr = array(&[6]);
        arr.write(&region(&[0], &[6]), &patch(&[6], &[1, 2, 3, 4, 2, 0]))
            .unwrap();
        assert_eq!(arr.max_label(), 4);

        arr.delete_label(2);

        assert_eq!(
            arr.read(&region(&[0], &[6])).unwrap(),
            patch(&[6], &[1, 0, 2, 3, 0, 0])
        );
        // Index values follow the renumbering
        assert_eq!(arr.nonzero_coordinates(), vec![0, 2, 3]);
        assert_eq!(arr.nonzero_values(), vec![1, 2, 3]);
        assert_eq!(arr.max_label(), 3);
    }

    #[test]
    fn test_delete_label_zero_is_noop() {
        let arr = array(&[4]);
        arr.write(&region(&[0], &[4]), &patch(&[4], &[1, 0, 0, 0]))
            .unwrap();
        arr.delete_label(0);
        assert_eq!(arr.max_label(), 1);
    }

    #[test]
    fn test_out_of_bounds() {
        let arr = array(&[4, 4]);
        assert!(matches!(
            arr.read(&region(&[0, 0], &[4, 5])),
            Err(VolumeError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_max_label_tracks_writes() {
        let arr = array(&[4]);
        arr.write(&region(&[0], &[2]), &patch(&[2], &[9, 1])).unwrap();
        assert_eq!(arr.max_label(), 9);
        arr.write(&region(&[0], &[1]), &patch(&[1], &[ERASER])).unwrap();
        assert_eq!(arr.max_label(), 1);
    }
}
