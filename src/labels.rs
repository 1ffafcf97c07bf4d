//! Label volume - user-drawn label semantics on top of the block store
//!
//! Inserting label pixels has a special meaning: zeros in a patch mean
//! "don't change", nonzero values overwrite, and the configured eraser value
//! clears a pixel back to 0. Labels exposed by the volume stay contiguous:
//! purging label `n` renumbers every label above `n` downward.

use crate::error::{Result, VolumeError};
use crate::grid::{block_extent, intersecting_blocks, Region};
use crate::io::{backend_for_url, StorageBackend};
use crate::metadata::VolumeMeta;
use crate::store::{BlockStore, StoreStats};
use crate::types::LabelValue;
use crate::META_KEY;
use async_trait::async_trait;
use log::debug;
use ndarray::{ArrayD, Zip};
use num_traits::NumCast;
use parking_lot::RwLock;
use std::sync::Arc;

/// A collaborator that serves array data for a region on request.
/// Bulk ingestion pulls its source data through this interface.
#[async_trait]
pub trait RegionSource<T: LabelValue>: Send + Sync {
    /// Shape of the full source array
    fn shape(&self) -> Vec<usize>;

    /// Produce the data for `region`; the result must have the region's
    /// shape
    async fn request(&self, region: &Region) -> Result<ArrayD<T>>;
}

/// Receiver for dirty notifications: called exactly once per logically
/// changed region per write.
pub trait DirtyListener: Send + Sync {
    fn mark_dirty(&self, region: &Region);
}

/// Merge a label patch into existing content.
///
/// Wherever the patch is nonzero the original value is cleared first, so the
/// bitwise-or merge takes the incoming value there and keeps the old value
/// elsewhere. Occurrences of the eraser sentinel come out as 0.
pub fn merge_labels<T: LabelValue>(
    original: &ArrayD<T>,
    patch: &ArrayD<T>,
    eraser: T,
) -> ArrayD<T> {
    let mut merged = original.clone();
    Zip::from(&mut merged).and(patch).for_each(|m, &p| {
        if !p.is_zero() {
            *m = T::zero();
        }
        *m = *m | p;
        if *m == eraser {
            *m = T::zero();
        }
    });
    merged
}

/// Blockwise compressed storage for user-drawn labels
pub struct LabelVolume<T: LabelValue> {
    store: BlockStore<T>,
    eraser: T,
    listener: RwLock<Option<Arc<dyn DirtyListener>>>,
}

impl<T: LabelValue> std::fmt::Debug for LabelVolume<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelVolume")
            .field("eraser", &self.eraser)
            .field("has_listener", &self.listener.read().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: LabelValue> LabelVolume<T> {
    /// Create a volume on the given backend
    pub async fn create(backend: Arc<dyn StorageBackend>, meta: VolumeMeta) -> Result<Self> {
        Self::from_store(BlockStore::create(backend, meta).await?)
    }

    /// Open an existing volume from the given backend
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        Self::from_store(BlockStore::open(backend).await?)
    }

    /// Create a volume at a URL (`file://...` or `mem:`)
    pub async fn create_at(url: &str, meta: VolumeMeta) -> Result<Self> {
        Self::create(Arc::from(backend_for_url(url)?), meta).await
    }

    /// Open a volume at a URL
    pub async fn open_at(url: &str) -> Result<Self> {
        Self::open(Arc::from(backend_for_url(url)?)).await
    }

    fn from_store(store: BlockStore<T>) -> Result<Self> {
        let meta = store.meta();
        let eraser: T = NumCast::from(meta.eraser).ok_or_else(|| {
            VolumeError::Configuration(format!(
                "Eraser value {} does not fit dtype {}",
                meta.eraser,
                T::DTYPE
            ))
        })?;
        Ok(Self {
            store,
            eraser,
            listener: RwLock::new(None),
        })
    }

    /// The underlying block store
    pub fn store(&self) -> &BlockStore<T> {
        &self.store
    }

    /// The configured eraser sentinel
    pub fn eraser(&self) -> T {
        self.eraser
    }

    pub fn meta(&self) -> VolumeMeta {
        self.store.meta()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
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

    /// Read current label content for `region`
    pub async fn read(&self, region: &Region) -> Result<ArrayD<T>> {
        self.store.read(region).await
    }

    /// Apply a label patch to `region` and return the cleaned result.
    ///
    /// The read-merge-write sequence is atomic per block; concurrent writers
    /// to overlapping regions must be serialized by the caller. An edit that
    /// nets to all-zero in previously empty territory allocates nothing.
    pub async fn write(&self, region: &Region, patch: &ArrayD<T>) -> Result<ArrayD<T>> {
        if patch.shape() != region.shape().as_slice() {
            return Err(VolumeError::InvalidDimensions(format!(
                "Patch of shape {:?} does not cover region {}",
                patch.shape(),
                region
            )));
        }

        let original = self.store.read(region).await?;
        let cleaned = merge_labels(&original, patch, self.eraser);
        self.store.write(region, &cleaned, false).await?;
        self.notify_dirty(region);
        Ok(cleaned)
    }

    /// Remove one label value and renumber all greater labels downward so
    /// the stored label set stays contiguous.
    ///
    /// Scans only blocks that currently exist; a block is rewritten (and
    /// reported dirty) only if at least one pixel changed. Label 0 is the
    /// disabled state and purges nothing. Returns the number of rewritten
    /// blocks.
    pub async fn purge_label(&self, label: T) -> Result<usize> {
        if label.is_zero() {
            return Ok(0);
        }

        let snapshot = self.store.clean_blocks();
        let mut changed_extents = Vec::new();

        for extent in snapshot {
            let mut block = self.store.read(&extent).await?;
            let mut changed = false;
            for v in block.iter_mut() {
                if *v == label {
                    *v = T::zero();
                    changed = true;
                } else if *v > label {
                    *v = *v - T::one();
                    changed = true;
                }
            }
            if changed {
                self.store.write(&extent, &block, false).await?;
                changed_extents.push(extent);
            }
        }

        debug!(
            "purged label {}: {} of {} blocks rewritten",
            label,
            changed_extents.len(),
            self.store.clean_blocks().len()
        );
        for extent in &changed_extents {
            self.notify_dirty(extent);
        }
        Ok(changed_extents.len())
    }

    /// Copy a whole pre-existing label array into this volume, one block at
    /// a time in block-coordinate order, applying the usual merge and eraser
    /// rules. Returns the maximum label value observed in the cleaned data.
    pub async fn ingest(&self, source: &dyn RegionSource<T>) -> Result<T> {
        let shape = self.store.shape();
        if source.shape() != shape {
            return Err(VolumeError::InvalidDimensions(format!(
                "Source shape {:?} does not match volume shape {:?}",
                source.shape(),
                shape
            )));
        }

        let block_shape = self.store.block_shape();
        let full = Region::from_shape(&shape);
        let mut max_label = T::zero();

        for coord in intersecting_blocks(&block_shape, &full) {
            let extent = block_extent(&shape, &block_shape, &coord);
            let data = source.request(&extent).await?;
            if data.shape() != extent.shape().as_slice() {
                return Err(VolumeError::InvalidDimensions(format!(
                    "Source returned shape {:?} for region {}",
                    data.shape(),
                    extent
                )));
            }
            let cleaned = self.write(&extent, &data).await?;
            max_label = cleaned.iter().fold(max_label, |m, &v| m.max(v));
        }

        Ok(max_label)
    }

    /// Extents of all blocks currently holding data, in block-coordinate
    /// order
    pub fn clean_blocks(&self) -> Vec<Region> {
        self.store.clean_blocks()
    }

    /// Delete all stored blocks and the metadata document
    pub async fn destroy(self) -> Result<()> {
        let backend = self.store.backend();
        self.store.clear().await?;
        if backend.exists(META_KEY).await? {
            backend.delete(META_KEY).await?;
        }
        Ok(())
    }
}
