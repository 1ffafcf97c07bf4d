//! Core data types for label volumes

use num_traits::{PrimInt, Unsigned};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element types supported for label data
///
/// Labels are small unsigned integers, so only the unsigned widths are
/// representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8 = 0,
    /// Unsigned 16-bit integer
    U16 = 1,
    /// Unsigned 32-bit integer
    U32 = 2,
    /// Unsigned 64-bit integer
    U64 = 3,
}

impl DataType {
    /// Size in bytes of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
            DataType::U64 => 8,
        }
    }

    /// Maximum label value representable by this data type
    pub fn max_value(&self) -> u64 {
        match self {
            DataType::U8 => u8::MAX as u64,
            DataType::U16 => u16::MAX as u64,
            DataType::U32 => u32::MAX as u64,
            DataType::U64 => u64::MAX,
        }
    }

    /// Parse an NPY-style descriptor such as `|u1` or `<u2`
    pub fn from_npy_descr(descr: &str) -> Option<Self> {
        match descr {
            "|u1" | "<u1" => Some(DataType::U8),
            "<u2" => Some(DataType::U16),
            "<u4" => Some(DataType::U32),
            "<u8" => Some(DataType::U64),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Semantic role of a volume axis
///
/// Axis tags drive projection-axis inference and channel handling. The order
/// of the tag vector matches the order of the shape vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Time
    T,
    /// Depth slice
    Z,
    /// Row
    Y,
    /// Column
    X,
    /// Channel
    C,
}

impl Axis {
    /// One-letter key for this axis, lowercase
    pub fn key(&self) -> char {
        match self {
            Axis::T => 't',
            Axis::Z => 'z',
            Axis::Y => 'y',
            Axis::X => 'x',
            Axis::C => 'c',
        }
    }

    /// Parse from a one-letter key
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            't' => Some(Axis::T),
            'z' => Some(Axis::Z),
            'y' => Some(Axis::Y),
            'x' => Some(Axis::X),
            'c' => Some(Axis::C),
            _ => None,
        }
    }

    /// Projection priority order: when several axes are eligible for
    /// collapsing, the earliest entry here wins.
    pub const PROJECTION_PRIORITY: [Axis; 4] = [Axis::Z, Axis::Y, Axis::X, Axis::T];
}

/// Parse a compact tag string such as `"tzyxc"` into an axis vector
pub fn parse_axistags(tags: &str) -> Option<Vec<Axis>> {
    tags.chars().map(Axis::from_key).collect()
}

/// Default axis tags for a given rank, matching the conventions of common
/// annotation datasets
pub fn default_axistags(ndim: usize) -> Option<Vec<Axis>> {
    match ndim {
        2 => parse_axistags("yx"),
        3 => parse_axistags("zyx"),
        4 => parse_axistags("zyxc"),
        5 => parse_axistags("tzyxc"),
        _ => None,
    }
}

/// Value range hint for a volume
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Element type of a label array
///
/// Implementations bind a compile-time element type to its [`DataType`] and
/// provide the little-endian byte codec used for block persistence.
pub trait LabelValue:
    PrimInt + Unsigned + Default + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// The runtime dtype corresponding to this element type
    const DTYPE: DataType;

    /// Append this value to `out` in little-endian order
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one value from a little-endian chunk of
    /// `Self::DTYPE.size_in_bytes()` bytes
    fn read_le(chunk: &[u8]) -> Self;
}

impl LabelValue for u8 {
    const DTYPE: DataType = DataType::U8;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self);
    }

    fn read_le(chunk: &[u8]) -> Self {
        chunk[0]
    }
}

impl LabelValue for u16 {
    const DTYPE: DataType = DataType::U16;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(chunk: &[u8]) -> Self {
        u16::from_le_bytes([chunk[0], chunk[1]])
    }
}

impl LabelValue for u32 {
    const DTYPE: DataType = DataType::U32;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(chunk: &[u8]) -> Self {
        u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
    }
}

impl LabelValue for u64 {
    const DTYPE: DataType = DataType::U64;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(chunk: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&chunk[..8]);
        u64::from_le_bytes(buf)
    }
}
