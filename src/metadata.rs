//! Volume metadata
//!
//! A volume's metadata is fixed once configured: shape, dtype, axis tags and
//! block shape must survive reopen unchanged, and incompatible changes are
//! rejected rather than migrated.

use crate::compression::CompressionMethod;
use crate::error::{Result, VolumeError};
use crate::types::{Axis, DataType, ValueRange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata document format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
}

impl FormatVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Complete metadata for a label volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMeta {
    /// Document format version
    pub version: FormatVersion,

    /// Per-axis extents, in axis-tag order
    pub shape: Vec<usize>,

    /// Element type of the stored labels
    pub dtype: DataType,

    /// Semantic role of each axis
    pub axistags: Vec<Axis>,

    /// Logical block shape of the grid
    pub block_shape: Vec<usize>,

    /// Compression method for block buffers
    pub compression: CompressionMethod,

    /// Sentinel label value meaning "erase this pixel"
    pub eraser: u64,

    /// Value range hint for display
    pub value_range: Option<ValueRange>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl VolumeMeta {
    /// Create metadata with the given shape, axis tags and block shape.
    /// Compression defaults to Zstd and the eraser to the dtype maximum.
    pub fn new(
        shape: Vec<usize>,
        dtype: DataType,
        axistags: Vec<Axis>,
        block_shape: Vec<usize>,
    ) -> Result<Self> {
        let now = Utc::now();
        let meta = Self {
            version: FormatVersion::default(),
            shape,
            dtype,
            axistags,
            block_shape,
            compression: CompressionMethod::Zstd,
            eraser: dtype.max_value(),
            value_range: None,
            created_at: now,
            modified_at: now,
        };
        meta.validate()?;
        Ok(meta)
    }

    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    pub fn with_eraser(mut self, eraser: u64) -> Self {
        self.eraser = eraser;
        self
    }

    pub fn with_value_range(mut self, range: ValueRange) -> Self {
        self.value_range = Some(range);
        self
    }

    /// Number of axes of the volume
    pub fn num_axes(&self) -> usize {
        self.shape.len()
    }

    /// Index of the channel axis, if the volume has one
    pub fn channel_axis(&self) -> Option<usize> {
        self.axistags.iter().position(|&a| a == Axis::C)
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// Structural validity of this metadata
    pub fn validate(&self) -> Result<()> {
        let ndim = self.shape.len();
        if ndim == 0 {
            return Err(VolumeError::InvalidDimensions(
                "Volume must have at least one axis".to_string(),
            ));
        }
        if self.axistags.len() != ndim {
            return Err(VolumeError::InvalidDimensions(format!(
                "{} axis tags given for a {}-axis shape",
                self.axistags.len(),
                ndim
            )));
        }
        if self.block_shape.len() != ndim {
            return Err(VolumeError::InvalidDimensions(format!(
                "Block shape {:?} does not match the {}-axis shape",
                self.block_shape, ndim
            )));
        }
        if self.block_shape.iter().any(|&b| b == 0) {
            return Err(VolumeError::Configuration(
                "Block shape axes must be nonzero".to_string(),
            ));
        }
        if self.eraser == 0 || self.eraser > self.dtype.max_value() {
            return Err(VolumeError::Configuration(format!(
                "Eraser value {} is not a nonzero {} label",
                self.eraser, self.dtype
            )));
        }
        Ok(())
    }

    /// Reject an on-disk metadata document that does not match this
    /// configuration. Timestamps and value-range hints may differ; the
    /// structural fields may not.
    pub fn check_compatible(&self, stored: &VolumeMeta) -> Result<()> {
        if !self.version.is_compatible(&stored.version) {
            return Err(VolumeError::Configuration(format!(
                "Stored metadata version {}.{} is incompatible with {}.{}",
                stored.version.major,
                stored.version.minor,
                self.version.major,
                self.version.minor
            )));
        }
        if self.shape != stored.shape
            || self.dtype != stored.dtype
            || self.axistags != stored.axistags
            || self.block_shape != stored.block_shape
            || self.compression != stored.compression
            || self.eraser != stored.eraser
        {
            return Err(VolumeError::Configuration(
                "Stored volume metadata does not match the requested configuration".to_string(),
            ));
        }
        Ok(())
    }
}
