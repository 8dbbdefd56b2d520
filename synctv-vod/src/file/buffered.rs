use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{check_range, MediaFile, MIN_WINDOW_SIZE};
use crate::error::FileCacheError;

struct ReaderState {
    reader: BufReader<File>,
    /// Logical position of `reader`. `None` after a failed seek or read,
    /// which forces an absolute seek on the next access.
    position: Option<u64>,
}

/// Buffered sequential reader with seeks, shared through the file cache.
///
/// Reads are serialized by an internal lock so the same handle can serve
/// several streams. Sequential access (the common case while feeding)
/// reuses the read-ahead buffer; short hops use `seek_relative`.
pub struct BufferedFile {
    path: PathBuf,
    len: u64,
    state: Mutex<ReaderState>,
}

impl BufferedFile {
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

        let capacity = window_size.max(MIN_WINDOW_SIZE);
        tracing::debug!(
            "Opened buffered file {:?} ({} bytes, window {})",
            path,
            metadata.len(),
            capacity
        );

        Ok(Self {
            path: path.to_path_buf(),
            len: metadata.len(),
            state: Mutex::new(ReaderState {
                reader: BufReader::with_capacity(capacity, file),
                position: Some(0),
            }),
        })
    }
}

impl MediaFile for BufferedFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.len, offset, buf.len())?;

        let mut state = self.state.lock();
        let seeked = match state.position {
            Some(position) if position == offset => Ok(()),
            Some(position) => {
                let delta = i64::try_from(offset).unwrap_or(i64::MAX)
                    - i64::try_from(position).unwrap_or(i64::MAX);
                state.reader.seek_relative(delta)
            }
            None => state.reader.seek(SeekFrom::Start(offset)).map(|_| ()),
        };
        if let Err(e) = seeked {
            state.position = None;
            return Err(e);
        }

        if let Err(e) = state.reader.read_exact(buf) {
            state.position = None;
            return Err(e);
        }
        state.position = Some(offset + buf.len() as u64);
        Ok(())
    }
}

impl Drop for BufferedFile {
    fn drop(&mut self) {
        tracing::debug!("Closed buffered file {:?}", self.path);
    }
}
