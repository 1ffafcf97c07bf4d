//! Block grid - maps regions of interest onto a fixed grid of blocks
//!
//! Everything here is pure: no I/O, no shared state, safe to call from any
//! thread without synchronization.

use crate::error::{Result, VolumeError};
use ndarray::SliceInfoElem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate of a cell in the block grid, one component per axis
pub type BlockCoord = Vec<usize>;

/// A half-open multi-axis coordinate interval `[start, stop)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    start: Vec<usize>,
    stop: Vec<usize>,
}

impl Region {
    /// Create a region from start/stop vectors
    pub fn new(start: Vec<usize>, stop: Vec<usize>) -> Result<Self> {
        if start.len() != stop.len() {
            return Err(VolumeError::InvalidDimensions(format!(
                "Region start has {} axes but stop has {}",
                start.len(),
                stop.len()
            )));
        }
        if start.iter().zip(&stop).any(|(s, e)| s > e) {
            return Err(VolumeError::InvalidDimensions(format!(
                "Region start {:?} exceeds stop {:?}",
                start, stop
            )));
        }
        Ok(Self { start, stop })
    }

    /// The full region of an array with the given shape
    pub fn from_shape(shape: &[usize]) -> Self {
        Self {
            start: vec![0; shape.len()],
            stop: shape.to_vec(),
        }
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn stop(&self) -> &[usize] {
        &self.stop
    }

    pub fn num_axes(&self) -> usize {
        self.start.len()
    }

    /// Per-axis extent of the region
    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(&s, &e)| e - s)
            .collect()
    }

    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    /// True iff any axis interval is empty
    pub fn is_empty(&self) -> bool {
        self.start.iter().zip(&self.stop).any(|(s, e)| s == e)
    }

    /// Axis-wise interval intersection; `None` iff the intersection is empty
    /// on any axis
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        if self.num_axes() != other.num_axes() {
            return None;
        }
        let start: Vec<usize> = self
            .start
            .iter()
            .zip(&other.start)
            .map(|(&a, &b)| a.max(b))
            .collect();
        let stop: Vec<usize> = self
            .stop
            .iter()
            .zip(&other.stop)
            .map(|(&a, &b)| a.min(b))
            .collect();
        if start.iter().zip(&stop).any(|(s, e)| s >= e) {
            None
        } else {
            Some(Region { start, stop })
        }
    }

    /// Translate this region so that `origin` becomes the zero point.
    /// `origin` must be component-wise <= `self.start`.
    pub fn relative_to(&self, origin: &[usize]) -> Region {
        Region {
            start: self
                .start
                .iter()
                .zip(origin)
                .map(|(&s, &o)| s - o)
                .collect(),
            stop: self.stop.iter().zip(origin).map(|(&e, &o)| e - o).collect(),
        }
    }

    /// Fail with `OutOfBounds` if this region exceeds `shape` on any axis
    pub fn check_within(&self, shape: &[usize]) -> Result<()> {
        if self.num_axes() != shape.len() {
            return Err(VolumeError::InvalidDimensions(format!(
                "Region {} has {} axes but the array shape {:?} has {}",
                self,
                self.num_axes(),
                shape,
                shape.len()
            )));
        }
        if self.stop.iter().zip(shape).any(|(e, s)| e > s) {
            return Err(VolumeError::OutOfBounds(format!(
                "Region {} exceeds array shape {:?}",
                self, shape
            )));
        }
        Ok(())
    }

    /// ndarray slicing argument selecting this region
    pub fn slice_info(&self) -> Vec<SliceInfoElem> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(&s, &e)| SliceInfoElem::Slice {
                start: s as isize,
                end: Some(e as isize),
                step: 1,
            })
            .collect()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (s, e)) in self.start.iter().zip(&self.stop).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", s, e)?;
        }
        write!(f, "]")
    }
}

/// Every block coordinate whose extent overlaps `region`, in row-major
/// block-coordinate order (last axis fastest). Exact: no block outside the
/// region is returned, and none inside is missed.
pub fn intersecting_blocks(block_shape: &[usize], region: &Region) -> Vec<BlockCoord> {
    if region.is_empty() || region.num_axes() != block_shape.len() {
        return Vec::new();
    }
    let first: Vec<usize> = region
        .start()
        .iter()
        .zip(block_shape)
        .map(|(&s, &b)| s / b)
        .collect();
    let last: Vec<usize> = region
        .stop()
        .iter()
        .zip(block_shape)
        .map(|(&e, &b)| (e - 1) / b)
        .collect();

    let mut out = Vec::new();
    let mut coords = first.clone();
    loop {
        out.push(coords.clone());

        // Increment coordinates
        let mut dim = coords.len() - 1;
        loop {
            coords[dim] += 1;
            if coords[dim] <= last[dim] {
                break;
            }
            coords[dim] = first[dim];
            if dim == 0 {
                return out;
            }
            dim -= 1;
        }
    }
}

/// Full extent of the block at `coord`, clipped to the array bounds at the
/// far edge of each axis
pub fn block_extent(array_shape: &[usize], block_shape: &[usize], coord: &[usize]) -> Region {
    let start: Vec<usize> = coord
        .iter()
        .zip(block_shape)
        .map(|(&c, &b)| c * b)
        .collect();
    let stop: Vec<usize> = start
        .iter()
        .zip(block_shape)
        .zip(array_shape)
        .map(|((&s, &b), &dim)| (s + b).min(dim))
        .collect();
    Region { start, stop }
}

/// Number of blocks along each axis for the given array and block shape
pub fn grid_shape(array_shape: &[usize], block_shape: &[usize]) -> Vec<usize> {
    array_shape
        .iter()
        .zip(block_shape)
        .map(|(&dim, &b)| dim.div_ceil(b))
        .collect()
}

/// Compressed-buffer window size, in bytes, targeted by the chunk-shape
/// heuristic
pub const CHUNK_WINDOW_BYTES: usize = 1 << 20;

/// Derive the chunk shape used as the compression window for a block.
///
/// Starts from the block shape and repeatedly halves the largest axis until
/// the chunk fits in [`CHUNK_WINDOW_BYTES`], balancing compression-window
/// size against access granularity. Deterministic; ties pick the first
/// largest axis.
pub fn derive_chunk_shape(block_shape: &[usize], dtype_size: usize) -> Vec<usize> {
    let mut chunk: Vec<usize> = block_shape.iter().map(|&b| b.max(1)).collect();
    if chunk.is_empty() {
        return chunk;
    }
    loop {
        let bytes = chunk.iter().product::<usize>() * dtype_size;
        if bytes <= CHUNK_WINDOW_BYTES {
            return chunk;
        }
        let mut axis = 0;
        for (i, &extent) in chunk.iter().enumerate() {
            if extent > chunk[axis] {
                axis = i;
            }
        }
        if chunk[axis] <= 1 {
            return chunk;
        }
        chunk[axis] = chunk[axis].div_ceil(2);
    }
}
