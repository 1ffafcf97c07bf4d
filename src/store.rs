//! Chunked block store
//!
//! Owns the mapping from block coordinate to compressed backing storage.
//! Blocks are created lazily on first non-default write, read and written
//! independently, and listed in block-coordinate order. A block that was
//! never written is logically all-zero and has no backing object.

use crate::compression::{codec_for, decode_frames, encode_frames};
use crate::error::{Result, VolumeError};
use crate::grid::{block_extent, derive_chunk_shape, intersecting_blocks, BlockCoord, Region};
use crate::io::StorageBackend;
use crate::metadata::VolumeMeta;
use crate::types::LabelValue;
use crate::utils::{block_key, bytes_to_values, format_bytes, parse_block_key, values_to_bytes};
use crate::META_KEY;
use futures::future::try_join_all;
use log::debug;
use ndarray::{ArrayD, IxDyn};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Per-block bookkeeping. The async mutex serializes all I/O touching one
/// block; `exists` flips to true once the block holds materialized data.
struct BlockHandle {
    lock: AsyncMutex<()>,
    exists: AtomicBool,
}

impl BlockHandle {
    fn new(exists: bool) -> Self {
        Self {
            lock: AsyncMutex::new(()),
            exists: AtomicBool::new(exists),
        }
    }

    fn is_clean(&self) -> bool {
        self.exists.load(Ordering::Acquire)
    }
}

struct StoreConfig {
    meta: VolumeMeta,
    chunk_shape: Vec<usize>,
}

/// Block-granular compressed storage for an N-dimensional array of labels
pub struct BlockStore<T: LabelValue> {
    config: RwLock<StoreConfig>,
    backend: Arc<dyn StorageBackend>,
    blocks: RwLock<BTreeMap<BlockCoord, Arc<BlockHandle>>>,
    _element: PhantomData<T>,
}

impl<T: LabelValue> std::fmt::Debug for BlockStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("block_count", &self.blocks.read().len())
            .finish_non_exhaustive()
    }
}

impl<T: LabelValue> BlockStore<T> {
    /// Create a volume on `backend`, writing its metadata document.
    ///
    /// If the backend already holds a volume, its stored metadata must be
    /// compatible with `meta`; an incompatible document is rejected without
    /// touching any block.
    pub async fn create(backend: Arc<dyn StorageBackend>, meta: VolumeMeta) -> Result<Self> {
        meta.validate()?;
        Self::check_dtype(&meta)?;

        if let Some(stored) = read_meta(backend.as_ref()).await? {
            meta.check_compatible(&stored)?;
        }
        write_meta(backend.as_ref(), &meta).await?;

        let store = Self::assemble(backend, meta);
        store.rebuild_index().await?;
        Ok(store)
    }

    /// Open an existing volume, rebuilding the block index from the backend
    /// listing. Object existence is the only index there is.
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let meta = read_meta(backend.as_ref()).await?.ok_or_else(|| {
            VolumeError::StorageBackend("backend holds no volume metadata".to_string())
        })?;
        meta.validate()?;
        Self::check_dtype(&meta)?;

        let store = Self::assemble(backend, meta);
        store.rebuild_index().await?;
        Ok(store)
    }

    fn assemble(backend: Arc<dyn StorageBackend>, meta: VolumeMeta) -> Self {
        let chunk_shape = derive_chunk_shape(&meta.block_shape, meta.dtype.size_in_bytes());
        Self {
            config: RwLock::new(StoreConfig { meta, chunk_shape }),
            backend,
            blocks: RwLock::new(BTreeMap::new()),
            _element: PhantomData,
        }
    }

    fn check_dtype(meta: &VolumeMeta) -> Result<()> {
        if meta.dtype != T::DTYPE {
            return Err(VolumeError::DtypeMismatch {
                expected: meta.dtype,
                found: T::DTYPE,
            });
        }
        Ok(())
    }

    async fn rebuild_index(&self) -> Result<()> {
        let ndim = self.config.read().meta.num_axes();
        let keys = self.backend.list(crate::BLOCK_PREFIX).await?;
        let mut blocks = self.blocks.write();
        for key in keys {
            if let Some(coord) = parse_block_key(&key) {
                if coord.len() == ndim {
                    blocks.insert(coord, Arc::new(BlockHandle::new(true)));
                }
            }
        }
        Ok(())
    }

    /// A copy of the volume metadata
    pub fn meta(&self) -> VolumeMeta {
        self.config.read().meta.clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.config.read().meta.shape.clone()
    }

    pub fn block_shape(&self) -> Vec<usize> {
        self.config.read().meta.block_shape.clone()
    }

    /// Chunk shape of the compressed backing buffer, derived from the block
    /// shape
    pub fn chunk_shape(&self) -> Vec<usize> {
        self.config.read().chunk_shape.clone()
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    /// Change the block shape.
    ///
    /// Legal only while no block holds data; afterwards this is a hard
    /// error, never a migration. Re-derives the chunk shape and persists the
    /// updated metadata.
    pub async fn set_block_shape(&self, block_shape: Vec<usize>) -> Result<()> {
        if self.blocks.read().values().any(|h| h.is_clean()) {
            return Err(VolumeError::Configuration(
                "block shape cannot be changed after blocks hold data".to_string(),
            ));
        }

        let meta = {
            let mut guard = self.config.write();
            let config = &mut *guard;
            if block_shape.len() != config.meta.num_axes() {
                return Err(VolumeError::InvalidDimensions(format!(
                    "Block shape {:?} does not match the {}-axis shape",
                    block_shape,
                    config.meta.num_axes()
                )));
            }
            if block_shape.iter().any(|&b| b == 0) {
                return Err(VolumeError::Configuration(
                    "Block shape axes must be nonzero".to_string(),
                ));
            }
            config.meta.block_shape = block_shape;
            config.chunk_shape =
                derive_chunk_shape(&config.meta.block_shape, config.meta.dtype.size_in_bytes());
            config.meta.touch();
            config.meta.clone()
        };
        write_meta(self.backend.as_ref(), &meta).await
    }

    /// Read `region` into a freshly allocated array. Blocks that do not
    /// exist contribute the default value (0).
    pub async fn read(&self, region: &Region) -> Result<ArrayD<T>> {
        let (shape, block_shape) = {
            let config = self.config.read();
            (config.meta.shape.clone(), config.meta.block_shape.clone())
        };
        region.check_within(&shape)?;

        let mut dest = ArrayD::from_elem(IxDyn(&region.shape()), T::zero());
        if region.is_empty() {
            return Ok(dest);
        }

        // Fetch and decompress all existing blocks concurrently, then
        // assemble into the destination.
        let mut fetches = Vec::new();
        for coord in intersecting_blocks(&block_shape, region) {
            if let Some(handle) = self.clean_handle(&coord) {
                fetches.push(self.fetch_block(coord, handle));
            }
        }
        let fetched = try_join_all(fetches).await?;

        for (coord, block_data) in fetched.into_iter().flatten() {
            let extent = block_extent(&shape, &block_shape, &coord);
            let isect = match region.intersection(&extent) {
                Some(isect) => isect,
                None => continue,
            };
            let dest_rel = isect.relative_to(region.start());
            let block_rel = isect.relative_to(extent.start());
            dest.slice_mut(dest_rel.slice_info().as_slice())
                .assign(&block_data.slice(block_rel.slice_info().as_slice()));
        }
        Ok(dest)
    }

    /// Write `data` covering `region` into the intersecting blocks.
    ///
    /// Blocks that do not yet exist are allocated on demand, except when the
    /// incoming segment for a block is entirely default and
    /// `store_zero_blocks` is false, in which case allocation is skipped and
    /// no empty block is ever materialized.
    pub async fn write(
        &self,
        region: &Region,
        data: &ArrayD<T>,
        store_zero_blocks: bool,
    ) -> Result<()> {
        let (shape, block_shape) = {
            let config = self.config.read();
            (config.meta.shape.clone(), config.meta.block_shape.clone())
        };
        region.check_within(&shape)?;
        if data.shape() != region.shape().as_slice() {
            return Err(VolumeError::InvalidDimensions(format!(
                "Data of shape {:?} does not cover region {}",
                data.shape(),
                region
            )));
        }

        for coord in intersecting_blocks(&block_shape, region) {
            let extent = block_extent(&shape, &block_shape, &coord);
            let isect = match region.intersection(&extent) {
                Some(isect) => isect,
                None => continue,
            };
            let src = data.slice(isect.relative_to(region.start()).slice_info().as_slice());

            if self.clean_handle(&coord).is_none()
                && !store_zero_blocks
                && src.iter().all(|v| v.is_zero())
            {
                // Nothing stored and nothing to store.
                continue;
            }

            let handle = self.ensure_handle(&coord);
            let _guard = handle.lock.lock().await;

            let mut block_data = if handle.is_clean() {
                self.load_block(&coord, &extent).await?
            } else {
                debug!("materializing block {:?} ({})", coord, extent);
                ArrayD::from_elem(IxDyn(&extent.shape()), T::zero())
            };
            block_data
                .slice_mut(isect.relative_to(extent.start()).slice_info().as_slice())
                .assign(&src);

            self.store_block(&coord, &block_data).await?;
            handle.exists.store(true, Ordering::Release);
        }

        self.config.write().meta.touch();
        Ok(())
    }

    /// Extents of all blocks currently holding data, in block-coordinate
    /// order
    pub fn clean_blocks(&self) -> Vec<Region> {
        let config = self.config.read();
        self.blocks
            .read()
            .iter()
            .filter(|(_, handle)| handle.is_clean())
            .map(|(coord, _)| block_extent(&config.meta.shape, &config.meta.block_shape, coord))
            .collect()
    }

    /// Whether the block at `coord` currently holds data
    pub fn block_exists(&self, coord: &[usize]) -> bool {
        self.blocks
            .read()
            .get(coord)
            .map(|handle| handle.is_clean())
            .unwrap_or(false)
    }

    /// Delete every block object and reset the index. The metadata document
    /// stays in place.
    pub async fn clear(&self) -> Result<()> {
        let handles: Vec<(BlockCoord, Arc<BlockHandle>)> = self
            .blocks
            .read()
            .iter()
            .map(|(coord, handle)| (coord.clone(), Arc::clone(handle)))
            .collect();

        for (coord, handle) in handles {
            let _guard = handle.lock.lock().await;
            if handle.is_clean() {
                self.backend.delete(&block_key(&coord)).await?;
                handle.exists.store(false, Ordering::Release);
            }
        }
        self.blocks.write().clear();
        Ok(())
    }

    /// Storage statistics
    pub fn stats(&self) -> StoreStats {
        let config = self.config.read();
        let dtype_bytes = config.meta.dtype.size_in_bytes();
        let mut num_blocks = 0;
        let mut logical_bytes = 0;
        for (coord, handle) in self.blocks.read().iter() {
            if handle.is_clean() {
                num_blocks += 1;
                logical_bytes +=
                    block_extent(&config.meta.shape, &config.meta.block_shape, coord)
                        .num_elements()
                        * dtype_bytes;
            }
        }
        StoreStats {
            num_blocks,
            block_shape: config.meta.block_shape.clone(),
            chunk_shape: config.chunk_shape.clone(),
            logical_bytes,
            compression: config.meta.compression,
        }
    }

    fn clean_handle(&self, coord: &[usize]) -> Option<Arc<BlockHandle>> {
        self.blocks
            .read()
            .get(coord)
            .filter(|handle| handle.is_clean())
            .cloned()
    }

    fn ensure_handle(&self, coord: &[usize]) -> Arc<BlockHandle> {
        Arc::clone(
            self.blocks
                .write()
                .entry(coord.to_vec())
                .or_insert_with(|| Arc::new(BlockHandle::new(false))),
        )
    }

    async fn fetch_block(
        &self,
        coord: BlockCoord,
        handle: Arc<BlockHandle>,
    ) -> Result<Option<(BlockCoord, ArrayD<T>)>> {
        let _guard = handle.lock.lock().await;
        if !handle.is_clean() {
            // Cleared while we waited for the lock.
            return Ok(None);
        }
        let (shape, block_shape) = {
            let config = self.config.read();
            (config.meta.shape.clone(), config.meta.block_shape.clone())
        };
        let extent = block_extent(&shape, &block_shape, &coord);
        let data = self.load_block(&coord, &extent).await?;
        Ok(Some((coord, data)))
    }

    async fn load_block(&self, coord: &[usize], extent: &Region) -> Result<ArrayD<T>> {
        let (compression, frame_len) = self.frame_params();
        let compressed = self.backend.read(&block_key(coord)).await?;
        let codec = codec_for(compression);
        let raw = decode_frames(codec.as_ref(), &compressed, frame_len)?;
        let values = bytes_to_values::<T>(&raw).ok_or_else(|| {
            VolumeError::Decompression(format!(
                "block {:?} payload is not a whole number of {} elements",
                coord,
                T::DTYPE
            ))
        })?;
        ArrayD::from_shape_vec(IxDyn(&extent.shape()), values).map_err(|_| {
            VolumeError::Decompression(format!(
                "block {:?} payload does not match extent {}",
                coord, extent
            ))
        })
    }

    async fn store_block(&self, coord: &[usize], data: &ArrayD<T>) -> Result<()> {
        let (compression, frame_len) = self.frame_params();
        let values: Vec<T> = data.iter().copied().collect();
        let raw = values_to_bytes(&values);
        let codec = codec_for(compression);
        let framed = encode_frames(codec.as_ref(), &raw, frame_len)?;
        self.backend.write(&block_key(coord), &framed).await
    }

    fn frame_params(&self) -> (crate::compression::CompressionMethod, usize) {
        let config = self.config.read();
        let frame_len =
            config.chunk_shape.iter().product::<usize>() * config.meta.dtype.size_in_bytes();
        (config.meta.compression, frame_len)
    }
}

/// Storage statistics for a block store
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub num_blocks: usize,
    pub block_shape: Vec<usize>,
    pub chunk_shape: Vec<usize>,
    pub logical_bytes: usize,
    pub compression: crate::compression::CompressionMethod,
}

impl StoreStats {
    pub fn summary(&self) -> String {
        format!(
            "{} blocks of shape {:?}, {} logical ({:?}, chunk {:?})",
            self.num_blocks,
            self.block_shape,
            format_bytes(self.logical_bytes),
            self.compression,
            self.chunk_shape,
        )
    }
}

async fn read_meta(backend: &dyn StorageBackend) -> Result<Option<VolumeMeta>> {
    if !backend.exists(META_KEY).await? {
        return Ok(None);
    }
    let bytes = backend.read(META_KEY).await?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn write_meta(backend: &dyn StorageBackend, meta: &VolumeMeta) -> Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    backend.write(META_KEY, &json).await
}
