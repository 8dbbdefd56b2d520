use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{check_range, FileAccess, FileAccessMode, FileHandle, MediaFile, MIN_WINDOW_SIZE};
use crate::error::FileCacheError;

struct View {
    file: File,
    start: u64,
    data: Vec<u8>,
}

impl View {
    fn range(&self) -> Range<u64> {
        self.start..self.start + self.data.len() as u64
    }

    fn contains(&self, offset: u64, len: usize) -> bool {
        let range = self.range();
        offset >= range.start && offset + len as u64 <= range.end
    }

    fn remap(&mut self, offset: u64, len: usize) -> io::Result<()> {
        self.data.clear();
        self.data.resize(len, 0);
        self.file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = self.file.read_exact(&mut self.data) {
            self.data.clear();
            return Err(e);
        }
        self.start = offset;
        Ok(())
    }
}

/// A window over a file owned by exactly one stream.
///
/// The window slides forward on demand; it is never shared, so there is no
/// cache entry and closing happens when the owning handle is released.
pub struct PrivateViewFile {
    path: PathBuf,
    len: u64,
    window_size: usize,
    view: Mutex<View>,
}

impl PrivateViewFile {
    pub fn open(path: &Path, window_size: usize) -> Result<Self, FileCacheError> {
        let open_error = |source| FileCacheError::FileOpen {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_error)?;
        let metadata = file.metadata().map_err(open_error)?;
        if !metadata.is_file() {
            return Err(open_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            len: metadata.len(),
            window_size: window_size.max(MIN_WINDOW_SIZE),
            view: Mutex::new(View {
                file,
                start: 0,
                data: Vec::new(),
            }),
        })
    }

    /// Byte range currently held in memory.
    #[must_use]
    pub fn mapped_range(&self) -> Range<u64> {
        self.view.lock().range()
    }
}

impl MediaFile for PrivateViewFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.len, offset, buf.len())?;

        let mut view = self.view.lock();
        if !view.contains(offset, buf.len()) {
            if buf.len() > self.window_size {
                // larger than a window: read straight through
                view.file.seek(SeekFrom::Start(offset))?;
                return view.file.read_exact(buf);
            }
            let remaining = usize::try_from(self.len - offset).unwrap_or(usize::MAX);
            view.remap(offset, self.window_size.min(remaining))?;
        }

        let from = usize::try_from(offset - view.start)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of view"))?;
        buf.copy_from_slice(&view.data[from..from + buf.len()]);
        Ok(())
    }
}

/// Access mode that opens a private view per call. Nothing is shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivateViewAccess;

impl FileAccess for PrivateViewAccess {
    fn open(&self, path: &Path, window_size: usize) -> Result<FileHandle, FileCacheError> {
        let file = PrivateViewFile::open(path, window_size)?;
        tracing::debug!("Opened private view {:?} ({} bytes)", path, file.len());
        Ok(FileHandle::private(path.to_path_buf(), Arc::new(file)))
    }

    fn mode(&self) -> FileAccessMode {
        FileAccessMode::PrivateView
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn numbered_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_window_slides_only_when_leaving_it() {
        let tmp = numbered_file(3 * MIN_WINDOW_SIZE);
        let file = PrivateViewFile::open(tmp.path(), MIN_WINDOW_SIZE).unwrap();
        assert!(file.mapped_range().is_empty());

        let mut buf = [0u8; 16];
        file.read_at(100, &mut buf).unwrap();
        assert_eq!(file.mapped_range(), 100..100 + MIN_WINDOW_SIZE as u64);
        assert_eq!(buf[0], 100);

        file.read_at(200, &mut buf).unwrap();
        assert_eq!(file.mapped_range(), 100..100 + MIN_WINDOW_SIZE as u64);

        let far = 2 * MIN_WINDOW_SIZE as u64;
        file.read_at(far, &mut buf).unwrap();
        assert_eq!(file.mapped_range().start, far);
        assert_eq!(buf[0], (far % 251) as u8);
    }

    #[test]
    fn test_window_is_clamped_at_end_of_file() {
        let tmp = numbered_file(MIN_WINDOW_SIZE + 10);
        let file = PrivateViewFile::open(tmp.path(), MIN_WINDOW_SIZE).unwrap();

        let mut buf = [0u8; 10];
        let offset = MIN_WINDOW_SIZE as u64;
        file.read_at(offset, &mut buf).unwrap();
        assert_eq!(file.mapped_range(), offset..offset + 10);
    }

    #[test]
    fn test_large_reads_bypass_window() {
        let tmp = numbered_file(4 * MIN_WINDOW_SIZE);
        let file = PrivateViewFile::open(tmp.path(), MIN_WINDOW_SIZE).unwrap();

        let mut buf = vec![0u8; 2 * MIN_WINDOW_SIZE];
        file.read_at(1, &mut buf).unwrap();
        assert_eq!(buf[0], 1);
        assert!(file.mapped_range().is_empty());
    }

    #[test]
    fn test_private_access_is_not_shared() {
        let tmp = numbered_file(64);
        let handle = PrivateViewAccess.open(tmp.path(), 0).unwrap();
        assert!(!handle.is_shared());
        assert_eq!(handle.len(), 64);
    }
}
