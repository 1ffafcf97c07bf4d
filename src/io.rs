//! Storage backends for block persistence
//!
//! A volume persists as one compressed object per block plus a `meta.json`
//! document; object existence itself is the block index. Backends only move
//! bytes and never interpret block contents.

use crate::error::{Result, VolumeError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Trait for block-object I/O
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the object at a key
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Write an object at a key, replacing any previous content
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Check whether an object exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete the object at a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys with a given prefix, relative to the backend root
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size in bytes of the object at a key
    async fn size(&self, key: &str) -> Result<usize>;
}

/// File system backend: one file per object under a base directory
pub struct FsBackend {
    base_path: PathBuf,
}

impl FsBackend {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn read(&self, key: &str) -> Result<Bytes> {
        let full_path = self.full_path(key);
        let data = fs::read(&full_path).await.map_err(VolumeError::Io)?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(VolumeError::Io)?;
        }

        let mut file = fs::File::create(&full_path)
            .await
            .map_err(VolumeError::Io)?;
        file.write_all(data).await.map_err(VolumeError::Io)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.full_path(key).exists())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        fs::remove_file(self.full_path(key))
            .await
            .map_err(VolumeError::Io)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.full_path(prefix);
        let mut keys = Vec::new();

        if dir.is_dir() {
            let mut read_dir = fs::read_dir(&dir).await.map_err(VolumeError::Io)?;
            while let Some(entry) = read_dir.next_entry().await.map_err(VolumeError::Io)? {
                if let Some(name) = entry.file_name().to_str() {
                    keys.push(format!("{}{}", prefix, name));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn size(&self, key: &str) -> Result<usize> {
        let metadata = fs::metadata(self.full_path(key))
            .await
            .map_err(VolumeError::Io)?;
        Ok(metadata.len() as usize)
    }
}

/// In-memory backend: keyed byte objects behind a lock.
/// The natural choice for ephemeral annotation sessions and tests.
#[derive(Default)]
pub struct MemBackend {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemBackend {
    async fn read(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| VolumeError::StorageBackend(format!("no such object: {}", key)))
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.objects
            .write()
            .insert(key.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn size(&self, key: &str) -> Result<usize> {
        Ok(self.read(key).await?.len())
    }
}

/// Create a backend from a URL.
///
/// `file:///path` (or a bare path) selects the filesystem backend; `mem:`
/// selects a fresh in-memory backend.
pub fn backend_for_url(url: &str) -> Result<Box<dyn StorageBackend>> {
    if url == "mem:" || url.starts_with("mem://") {
        return Ok(Box::new(MemBackend::new()));
    }
    if let Some(scheme_end) = url.find("://") {
        let scheme = &url[..scheme_end];
        if scheme != "file" {
            return Err(VolumeError::InvalidUrl(format!(
                "Unknown scheme: {}",
                scheme
            )));
        }
        return Ok(Box::new(FsBackend::new(&url[scheme_end + 3..])));
    }
    Ok(Box::new(FsBackend::new(url)))
}
