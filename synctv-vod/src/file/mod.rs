// File access for media sources
//
// Two interchangeable access modes implement the same contract:
// - Cached:      buffered reader shared between streams through `SharedFileCache`
// - PrivateView: a private window over the file, owned by a single stream
//
// Both hand out a `FileHandle` lease. Dropping the lease releases it.

pub mod buffered;
pub mod cache;
pub mod private_view;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::FileCacheError;

pub use buffered::BufferedFile;
pub use cache::SharedFileCache;
pub use private_view::{PrivateViewAccess, PrivateViewFile};

/// Smallest read-ahead window used by either access mode.
pub const MIN_WINDOW_SIZE: usize = 4 * 1024;

/// Random access to an opened media file.
pub trait MediaFile: Send + Sync {
    fn path(&self) -> &Path;

    /// Total file length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Fails with `UnexpectedEof` when the range extends past the end of
    /// the file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

pub(crate) fn check_range(len: u64, offset: u64, wanted: usize) -> io::Result<()> {
    match offset.checked_add(wanted as u64) {
        Some(end) if end <= len => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read of {wanted} bytes at offset {offset} exceeds file length {len}"),
        )),
    }
}

/// Strategy that turns a path into a [`FileHandle`].
pub trait FileAccess: Send + Sync {
    /// Open `path`. `window_size` is a read-ahead hint.
    fn open(&self, path: &Path, window_size: usize) -> Result<FileHandle, FileCacheError>;

    fn mode(&self) -> FileAccessMode;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAccessMode {
    /// Buffered reads through a handle shared by every stream of the same file.
    #[default]
    Cached,
    /// A private window per stream; never shared, never cached.
    PrivateView,
}

impl FileAccessMode {
    /// Build the access strategy for this mode. `cache` is only used by
    /// [`FileAccessMode::Cached`].
    #[must_use]
    pub fn access(self, cache: &SharedFileCache) -> Arc<dyn FileAccess> {
        match self {
            Self::Cached => Arc::new(cache.clone()),
            Self::PrivateView => Arc::new(PrivateViewAccess),
        }
    }
}

/// A lease on an opened media file.
///
/// The lease is released exactly once: either explicitly with
/// [`FileHandle::release`] or when it is dropped.
pub struct FileHandle {
    path: PathBuf,
    file: Option<Arc<dyn MediaFile>>,
    cache: Option<SharedFileCache>,
}

impl FileHandle {
    pub(crate) fn cached(path: PathBuf, file: Arc<dyn MediaFile>, cache: SharedFileCache) -> Self {
        Self {
            path,
            file: Some(file),
            cache: Some(cache),
        }
    }

    pub(crate) fn private(path: PathBuf, file: Arc<dyn MediaFile>) -> Self {
        Self {
            path,
            file: Some(file),
            cache: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.file.is_none()
    }

    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.cache.is_some()
    }

    fn file(&self) -> io::Result<&Arc<dyn MediaFile>> {
        self.file.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("file handle for {:?} already released", self.path),
            )
        })
    }

    /// File length, or 0 once released.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.file.as_ref().map_or(0, |file| file.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file()?.read_at(offset, buf)
    }

    /// Read `len` bytes at `offset` and append them to `out`.
    pub fn read_into(&self, offset: u64, len: usize, out: &mut BytesMut) -> io::Result<()> {
        let file = self.file()?;
        check_range(file.len(), offset, len)?;
        let start = out.len();
        out.resize(start + len, 0);
        if let Err(e) = file.read_at(offset, &mut out[start..]) {
            out.truncate(start);
            return Err(e);
        }
        Ok(())
    }

    /// Read the whole file.
    pub fn read_all(&self) -> io::Result<Bytes> {
        let len = usize::try_from(self.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large"))?;
        let mut out = BytesMut::with_capacity(len);
        self.read_into(0, len, &mut out)?;
        Ok(out.freeze())
    }

    /// Give the lease back. A second release of the same lease is an
    /// invariant violation.
    pub fn release(&mut self) -> Result<(), FileCacheError> {
        let Some(file) = self.file.take() else {
            return Err(FileCacheError::InvariantViolation(format!(
                "file handle for {:?} released twice",
                self.path
            )));
        };
        match &self.cache {
            Some(cache) => cache.release_entry(&self.path, file),
            None => {
                tracing::trace!("Closed private view: {:?}", self.path);
                Ok(())
            }
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.release() {
                tracing::error!("Failed to release file handle {:?}: {}", self.path, e);
            }
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("shared", &self.is_shared())
            .field("released", &self.is_released())
            .finish()
    }
}
