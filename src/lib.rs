//! labelvol - Blockwise compressed label storage
//!
//! A caching and label-storage engine for interactive annotation of large
//! multi-dimensional image volumes: only the blocks actually touched by an
//! edit are materialized, each block persists as an independently compressed
//! object, and user-drawn label patches carry "don't change" and "erase"
//! pixel semantics.
//!
//! # Features
//!
//! - Up to 5D volumes with semantic axis tags (t, z, y, x, c)
//! - Lazy block allocation: untouched territory is never stored
//! - Per-block compression (Deflate, Zstd, RLE) with chunk-sized frames
//! - Label merge semantics: nonzero pixels overwrite, zeros preserve,
//!   a configurable eraser value clears
//! - Label purge with contiguous renumbering
//! - Depth-encoded 2D maximum projection of label stacks
//! - A fully in-memory sparse alternative for small volumes
//!
//! # Example
//!
//! ```rust,ignore
//! use labelvol::{LabelVolume, Region, VolumeMeta, DataType, parse_axistags};
//!
//! # async fn example() -> labelvol::Result<()> {
//! let meta = VolumeMeta::new(
//!     vec![1, 128, 128, 128, 1],
//!     DataType::U8,
//!     parse_axistags("tzyxc").unwrap(),
//!     vec![1, 32, 32, 32, 1],
//! )?;
//! let volume: LabelVolume<u8> = LabelVolume::create_at("file:///data/labels", meta).await?;
//!
//! let roi = Region::new(vec![0, 10, 10, 10, 0], vec![1, 12, 12, 12, 1])?;
//! let cleaned = volume.write(&roi, &patch).await?;
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod error;
pub mod grid;
pub mod io;
pub mod labels;
pub mod metadata;
pub mod npy;
mod projection;
pub mod sparse;
pub mod store;
pub mod types;
pub mod utils;

// Re-exports
pub use compression::{Codec, CompressionMethod};
pub use error::{Result, VolumeError};
pub use grid::{block_extent, intersecting_blocks, BlockCoord, Region};
pub use io::{backend_for_url, FsBackend, MemBackend, StorageBackend};
pub use labels::{merge_labels, DirtyListener, LabelVolume, RegionSource};
pub use metadata::VolumeMeta;
pub use npy::NpyVolume;
pub use sparse::SparseLabelArray;
pub use store::{BlockStore, StoreStats};
pub use types::{default_axistags, parse_axistags, Axis, DataType, LabelValue, ValueRange};

/// Version of the labelvol implementation
pub const LABELVOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Storage key of the volume metadata document
pub const META_KEY: &str = "meta.json";

/// Key prefix under which block objects live
pub const BLOCK_PREFIX: &str = "blocks/";
