//! Utility functions

use crate::grid::BlockCoord;
use crate::types::LabelValue;

/// Storage key for the block at the given grid coordinate.
///
/// Block coordinates are part of the physical naming scheme: there is no
/// durable catalog, so a key must be derivable from the coordinate alone and
/// parseable back.
pub fn block_key(coord: &[usize]) -> String {
    let joined = coord
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("-");
    format!("blocks/{}.blk", joined)
}

/// Recover a block coordinate from a storage key produced by [`block_key`].
/// Returns `None` for keys that are not block objects.
pub fn parse_block_key(key: &str) -> Option<BlockCoord> {
    let name = key.strip_prefix("blocks/")?.strip_suffix(".blk")?;
    name.split('-').map(|part| part.parse().ok()).collect()
}

/// Serialize label values to little-endian bytes
pub fn values_to_bytes<T: LabelValue>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DTYPE.size_in_bytes());
    for &v in values {
        v.write_le(&mut out);
    }
    out
}

/// Deserialize label values from little-endian bytes.
/// Returns `None` if the byte length is not a multiple of the element size.
pub fn bytes_to_values<T: LabelValue>(bytes: &[u8]) -> Option<Vec<T>> {
    let width = T::DTYPE.size_in_bytes();
    if bytes.len() % width != 0 {
        return None;
    }
    Some(bytes.chunks_exact(width).map(T::read_le).collect())
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
