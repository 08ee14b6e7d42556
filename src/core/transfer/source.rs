//! File byte sources for the send side.
//!
//! The send loop reads by `[offset, end)` windows so back-pressure stalls
//! never force buffering a whole file in memory. Sources are random-access
//! handles, not streaming readers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

/// Random-access view over one file's bytes.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Display name for the transfer record and the peer's `file-meta`.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read bytes `[offset, end)`. `end` never exceeds `len()`.
    async fn slice(&self, offset: u64, end: u64) -> Result<Bytes>;
}

/// A source backed by an in-memory buffer.
pub struct MemorySource {
    name: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl FileSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn slice(&self, offset: u64, end: u64) -> Result<Bytes> {
        Ok(self.data.slice(offset as usize..end as usize))
    }
}

/// A source backed by a file on disk, opened once and read with
/// seek + exact-read per slice.
pub struct DiskSource {
    name: String,
    path: PathBuf,
    size: u64,
    file: Mutex<tokio::fs::File>,
}

impl DiskSource {
    /// Open `path` and capture its current length.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        Ok(Self {
            name,
            path,
            size,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileSource for DiskSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.size
    }

    async fn slice(&self, offset: u64, end: u64) -> Result<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; (end - offset) as usize];
        file.read_exact(&mut buf)
            .await
            .with_context(|| format!("reading {} at {offset}", self.path.display()))?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_source_slices() {
        let src = MemorySource::new("m.bin", vec![7u8; 100]);
        assert_eq!(src.len(), 100);
        let mid = src.slice(10, 20).await.unwrap();
        assert_eq!(mid.len(), 10);
        let tail = src.slice(90, 100).await.unwrap();
        assert_eq!(tail.as_ref(), &[7u8; 10]);
    }

    #[tokio::test]
    async fn test_disk_source_slices() {
        let dir = std::env::temp_dir().join("qrdrop-source-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("sample.bin");
        let data: Vec<u8> = (0..=255u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let src = DiskSource::open(&path).await.unwrap();
        assert_eq!(src.len(), 256);
        assert_eq!(src.name(), "sample.bin");

        let window = src.slice(16, 32).await.unwrap();
        assert_eq!(window.as_ref(), &data[16..32]);
        // Out-of-order reads are fine: the handle seeks per slice.
        let head = src.slice(0, 4).await.unwrap();
        assert_eq!(head.as_ref(), &data[0..4]);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
