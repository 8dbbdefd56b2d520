// Reference-counted cache of open media files
//
// Many streams may play the same file at once. They share one buffered
// handle per path; the handle is closed when the last lease is released.
//
// The map lock only guards bookkeeping. Opening happens before the lock is
// taken (with a double check on insert) and the last reference is dropped
// after it is released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{BufferedFile, FileAccess, FileAccessMode, FileHandle, MediaFile};
use crate::error::FileCacheError;

struct CacheEntry {
    references: usize,
    file: Arc<BufferedFile>,
}

/// Shared file handle cache keyed by absolute path.
///
/// Cloning is cheap; all clones refer to the same registry. Create one per
/// process and pass it to every stream that uses the cached access mode.
#[derive(Clone, Default)]
pub struct SharedFileCache {
    entries: Arc<Mutex<HashMap<PathBuf, CacheEntry>>>,
}

impl SharedFileCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease the shared handle for `path`, opening it if no stream holds it.
    pub fn get_file(&self, path: &Path, window_size: usize) -> Result<FileHandle, FileCacheError> {
        let key = path.canonicalize().map_err(|source| FileCacheError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(file) = self.acquire_existing(&key) {
            return Ok(FileHandle::cached(key, file, self.clone()));
        }

        let opened = Arc::new(BufferedFile::open(&key, window_size)?);

        let file = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
                references: 0,
                file: Arc::clone(&opened),
            });
            entry.references += 1;
            tracing::trace!("File cache: {:?} now has {} references", key, entry.references);
            Arc::clone(&entry.file) as Arc<dyn MediaFile>
        };
        // `opened` is dropped here, outside the lock, if another stream won
        // the race to insert.
        drop(opened);

        Ok(FileHandle::cached(key, file, self.clone()))
    }

    fn acquire_existing(&self, key: &Path) -> Option<Arc<dyn MediaFile>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.references += 1;
        tracing::trace!("File cache hit: {:?} now has {} references", key, entry.references);
        Some(Arc::clone(&entry.file) as Arc<dyn MediaFile>)
    }

    /// Drop one reference for `path`. Called by [`FileHandle::release`].
    pub(crate) fn release_entry(
        &self,
        path: &Path,
        file: Arc<dyn MediaFile>,
    ) -> Result<(), FileCacheError> {
        let closed = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(path) else {
                return Err(FileCacheError::InvariantViolation(format!(
                    "release of {path:?} without a matching acquire"
                )));
            };
            entry.references -= 1;
            if entry.references == 0 {
                entries.remove(path).map(|entry| entry.file)
            } else {
                None
            }
        };

        drop(file);
        if let Some(file) = closed {
            tracing::debug!("File cache: last reference to {:?} released", path);
            drop(file);
        }
        Ok(())
    }

    /// Outstanding leases for `path`, `None` when the file is not open.
    #[must_use]
    pub fn ref_count(&self, path: &Path) -> Option<usize> {
        let key = path.canonicalize().ok()?;
        self.entries.lock().get(&key).map(|entry| entry.references)
    }

    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.ref_count(path).is_some()
    }

    /// Number of distinct open files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileAccess for SharedFileCache {
    fn open(&self, path: &Path, window_size: usize) -> Result<FileHandle, FileCacheError> {
        self.get_file(path, window_size)
    }

    fn mode(&self) -> FileAccessMode {
        FileAccessMode::Cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn media_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"media payload").unwrap();
        path
    }

    #[test]
    fn test_same_path_shares_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = media_file(dir.path(), "a.flv");
        let cache = SharedFileCache::new();

        let first = cache.get_file(&path, 0).unwrap();
        let second = cache.get_file(&path, 0).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ref_count(&path), Some(2));
        assert!(first.is_shared());

        drop(first);
        assert_eq!(cache.ref_count(&path), Some(1));
        drop(second);
        assert_eq!(cache.ref_count(&path), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_relative_and_absolute_paths_share_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = media_file(dir.path(), "b.flv");
        let cache = SharedFileCache::new();

        let _direct = cache.get_file(&path, 0).unwrap();
        let _dotted = cache.get_file(&dir.path().join(".").join("b.flv"), 0).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ref_count(&path), Some(2));
    }

    #[test]
    fn test_handle_open_iff_references_outstanding() {
        let dir = tempfile::tempdir().unwrap();
        let a = media_file(dir.path(), "a.flv");
        let b = media_file(dir.path(), "b.flv");
        let cache = SharedFileCache::new();

        let mut held: Vec<FileHandle> = Vec::new();
        // acquire, acquire, release, acquire, release... over two paths
        for step in 0..40usize {
            let path = if step % 3 == 0 { &b } else { &a };
            if step % 4 == 3 {
                if let Some(mut handle) = held.pop() {
                    handle.release().unwrap();
                }
            } else {
                held.push(cache.get_file(path, 0).unwrap());
            }

            for p in [&a, &b] {
                let outstanding = held.iter().filter(|h| h.path() == p.canonicalize().unwrap()).count();
                assert_eq!(cache.is_open(p), outstanding > 0);
                assert_eq!(cache.ref_count(p).unwrap_or(0), outstanding);
            }
        }

        held.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_double_release_is_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = media_file(dir.path(), "c.flv");
        let cache = SharedFileCache::new();

        let mut handle = cache.get_file(&path, 0).unwrap();
        let _other = cache.get_file(&path, 0).unwrap();

        handle.release().unwrap();
        let err = handle.release().unwrap_err();
        assert!(matches!(err, FileCacheError::InvariantViolation(_)));
        // the other lease is unaffected
        assert_eq!(cache.ref_count(&path), Some(1));
    }

    #[test]
    fn test_release_without_entry_is_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = media_file(dir.path(), "d.flv");
        let cache = SharedFileCache::new();
        let file: Arc<dyn MediaFile> = Arc::new(BufferedFile::open(&path, 0).unwrap());

        let result = cache.release_entry(&path, file);
        assert!(matches!(result, Err(FileCacheError::InvariantViolation(_))));
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedFileCache::new();

        let result = cache.get_file(&dir.path().join("nope.flv"), 0);
        assert!(matches!(result, Err(FileCacheError::FileOpen { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_leases_balance_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = media_file(dir.path(), "e.flv");
        let cache = SharedFileCache::new();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = cache.clone();
                let path = path.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        let handle = cache.get_file(&path, 0).unwrap();
                        let mut buf = [0u8; 5];
                        handle.read_at(0, &mut buf).unwrap();
                        assert_eq!(&buf, b"media");
                    }
                });
            }
        });

        assert!(cache.is_empty());
    }
}
