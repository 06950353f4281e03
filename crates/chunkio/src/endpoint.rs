//! Positioned local endpoints for transfers.
//!
//! A download writes completed parts into a [`PartSink`] at their final
//! offsets; an upload reads parts out of a [`PartSource`]. Both support
//! random-offset access so parts can complete in any order.
//!
//! [`FileSink`] stages all writes in a `<name>.part` file and only renames
//! it into place on [`commit`](PartSink::commit), so a failed or cancelled
//! transfer never leaves a partial file at the destination path.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::BoxFuture;

/// Destination for downloaded parts.
pub trait PartSink: Send + Sync {
    /// Writes `data` at `offset` in the staged destination.
    fn write_at<'a>(&'a self, offset: u64, data: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>>;

    /// Makes the staged data visible at the final destination.
    fn commit(&self) -> BoxFuture<'_, std::io::Result<()>>;

    /// Drops the staged data without publishing it.
    fn discard(&self) -> BoxFuture<'_, std::io::Result<()>>;
}

/// Source for uploaded parts.
pub trait PartSource: Send + Sync {
    /// Reads up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at end of file.
    fn read_at(&self, offset: u64, len: u32) -> BoxFuture<'_, std::io::Result<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// File-backed [`PartSink`] with `.part` staging.
pub struct FileSink {
    final_path: PathBuf,
    staging_path: PathBuf,
}

impl FileSink {
    /// Creates the staging file for `final_path`.
    ///
    /// Any existing staging file from an earlier attempt is truncated.
    pub async fn create(final_path: &Path) -> std::io::Result<Self> {
        let staging_path = staging_path_for(final_path);
        if let Some(parent) = staging_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::File::create(&staging_path).await?;
        Ok(Self {
            final_path: final_path.to_path_buf(),
            staging_path,
        })
    }

    /// Path the committed file will appear at.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}

impl PartSink for FileSink {
    fn write_at<'a>(&'a self, offset: u64, data: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            // Each call opens its own handle, so concurrent workers writing
            // disjoint ranges never contend on a shared cursor.
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&self.staging_path)
                .await?;
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(data).await?;
            Ok(())
        })
    }

    fn commit(&self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move { tokio::fs::rename(&self.staging_path, &self.final_path).await })
    }

    fn discard(&self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.staging_path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        })
    }
}

fn staging_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    final_path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// File-backed [`PartSource`].
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Opens `path` for positioned reads.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let size = tokio::fs::metadata(path).await?.len();
        Ok(Self {
            path: path.to_path_buf(),
            size,
        })
    }

    /// Total file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl PartSource for FileSource {
    fn read_at(&self, offset: u64, len: u32) -> BoxFuture<'_, std::io::Result<Vec<u8>>> {
        Box::pin(async move {
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            let mut buf = vec![0u8; len as usize];
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(buf)
        })
    }
}
