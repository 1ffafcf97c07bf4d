//! NPY raw-array loader
//!
//! Reads a NumPy `.npy` file into a dense label array and serves it through
//! [`RegionSource`], so a pre-existing annotation volume can be bulk-ingested
//! into a label volume. Any failure to open or parse the file is wrapped with
//! the attempted path; no partial state is retained.

use crate::error::{Result, VolumeError};
use crate::grid::Region;
use crate::labels::RegionSource;
use crate::types::{default_axistags, parse_axistags, Axis, DataType, LabelValue};
use crate::utils::bytes_to_values;
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// A dense label array loaded from a `.npy` file
#[derive(Debug)]
pub struct NpyVolume<T: LabelValue> {
    path: String,
    data: ArrayD<T>,
    axistags: Vec<Axis>,
}

impl<T: LabelValue> NpyVolume<T> {
    /// Load the file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let bytes = tokio::fs::read(path.as_ref())
            .await
            .map_err(|e| VolumeError::DatasetRead {
                path: path_str.clone(),
                reason: e.to_string(),
            })?;
        Self::parse(&bytes, path_str)
    }

    fn parse(bytes: &[u8], path: String) -> Result<Self> {
        let fail = |reason: String| VolumeError::DatasetRead {
            path: path.clone(),
            reason,
        };

        if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
            return Err(fail("not an NPY file".to_string()));
        }

        let (header_start, header_len) = match bytes[6] {
            1 => (
                10,
                u16::from_le_bytes([bytes[8], bytes[9]]) as usize,
            ),
            2 => {
                if bytes.len() < 12 {
                    return Err(fail("truncated NPY header".to_string()));
                }
                (
                    12,
                    u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                )
            }
            other => return Err(fail(format!("unsupported NPY version {}", other))),
        };
        let header_end = header_start + header_len;
        if bytes.len() < header_end {
            return Err(fail("truncated NPY header".to_string()));
        }
        let header = std::str::from_utf8(&bytes[header_start..header_end])
            .map_err(|_| fail("NPY header is not valid UTF-8".to_string()))?;

        let descr = extract_quoted(header, "descr")
            .ok_or_else(|| fail("missing 'descr' in NPY header".to_string()))?;
        let dtype = DataType::from_npy_descr(descr)
            .ok_or_else(|| fail(format!("unsupported NPY dtype '{}'", descr)))?;
        if dtype != T::DTYPE {
            return Err(VolumeError::DtypeMismatch {
                expected: T::DTYPE,
                found: dtype,
            });
        }

        if header.contains("'fortran_order': True") {
            return Err(fail("Fortran-ordered arrays are not supported".to_string()));
        }

        let shape = extract_shape(header)
            .ok_or_else(|| fail("missing 'shape' in NPY header".to_string()))?;
        let ndim = shape.len();
        if !(2..=5).contains(&ndim) {
            return Err(fail(format!(
                "{}-dimensional data is not supported (2 to 5 axes)",
                ndim
            )));
        }

        // Axis roles by rank; a 3D array with a small last dimension is
        // treated as 2D multichannel rather than a z-stack.
        let axistags = if ndim == 3 && shape[2] <= 4 {
            parse_axistags("yxc")
        } else {
            default_axistags(ndim)
        }
        .ok_or_else(|| fail("unable to infer axis roles".to_string()))?;

        let values = bytes_to_values::<T>(&bytes[header_end..])
            .ok_or_else(|| fail("payload is not a whole number of elements".to_string()))?;
        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|_| fail("payload does not match the header shape".to_string()))?;

        Ok(Self {
            path,
            data,
            axistags,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn axistags(&self) -> &[Axis] {
        &self.axistags
    }

    pub fn as_array(&self) -> &ArrayD<T> {
        &self.data
    }
}

#[async_trait]
impl<T: LabelValue> RegionSource<T> for NpyVolume<T> {
    fn shape(&self) -> Vec<usize> {
        self.data.shape().to_vec()
    }

    async fn request(&self, region: &Region) -> Result<ArrayD<T>> {
        region.check_within(self.data.shape())?;
        Ok(self.data.slice(region.slice_info().as_slice()).to_owned())
    }
}

/// Value of a `'key': 'value'` entry in the header dict
fn extract_quoted<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{}':", key);
    let after = &header[header.find(&pattern)? + pattern.len()..];
    let open = after.find('\'')?;
    let rest = &after[open + 1..];
    let close = rest.find('\'')?;
    Some(&rest[..close])
}

/// The `'shape': (...)` tuple in the header dict
fn extract_shape(header: &str) -> Option<Vec<usize>> {
    let after = &header[header.find("'shape':")? + "'shape':".len()..];
    let open = after.find('(')?;
    let close = after.find(')')?;
    if close < open {
        return None;
    }
    after[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}
