//! Local filesystem object store.
//!
//! Locations are paths relative to a root directory. Useful for mirrored
//! tile archives and for tests.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::FetchError;
use super::store::{BoxFuture, ByteRange, ObjectLocation, ObjectMeta, ObjectStore};

/// Object store reading files below `root`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &ObjectLocation) -> PathBuf {
        self.root.join(location.as_str().trim_start_matches('/'))
    }

    async fn read_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<Bytes, FetchError> {
        let path = self.path_for(location);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_error(location, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(location, e))?
            .len();
        if range.offset >= size {
            return Ok(Bytes::new());
        }
        let length = range.length.min(size - range.offset) as usize;

        file.seek(SeekFrom::Start(range.offset))
            .await
            .map_err(|e| io_error(location, e))?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| io_error(location, e))?;
        Ok(Bytes::from(buf))
    }

    async fn read_all(&self, location: &ObjectLocation) -> Result<Bytes, FetchError> {
        tokio::fs::read(self.path_for(location))
            .await
            .map(Bytes::from)
            .map_err(|e| io_error(location, e))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectMeta>, FetchError> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| FetchError::Io {
                location: dir.display().to_string(),
                reason: e.to_string(),
            })?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| FetchError::Io {
                location: dir.display().to_string(),
                reason: e.to_string(),
            })? {
                let path = entry.path();
                let meta = entry.metadata().await.map_err(|e| FetchError::Io {
                    location: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    found.push(ObjectMeta {
                        location: ObjectLocation::new(key),
                        size: meta.len(),
                    });
                }
            }
        }

        found.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(found)
    }
}

fn io_error(location: &ObjectLocation, error: std::io::Error) -> FetchError {
    match error.kind() {
        ErrorKind::NotFound => FetchError::NotFound {
            location: location.to_string(),
        },
        ErrorKind::PermissionDenied => FetchError::Unauthorized {
            location: location.to_string(),
            status: 403,
        },
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            FetchError::Transient {
                location: location.to_string(),
                reason: error.to_string(),
            }
        }
        _ => FetchError::Io {
            location: location.to_string(),
            reason: error.to_string(),
        },
    }
}

impl ObjectStore for LocalObjectStore {
    fn get_range<'a>(
        &'a self,
        location: &'a ObjectLocation,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.read_range(location, range))
    }

    fn get_object<'a>(
        &'a self,
        location: &'a ObjectLocation,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.read_all(location))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectMeta>, FetchError>> {
        Box::pin(self.list_prefix(prefix))
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalObjectStore) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("2024-06")).unwrap();
        std::fs::write(dir.path().join("2024-06/a.tif"), b"0123456789").unwrap();
        std::fs::write(dir.path().join("2024-06/b.tif"), b"abc").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"x").unwrap();
        let store = LocalObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_get_range() {
        let (_dir, store) = setup();
        let loc = ObjectLocation::new("2024-06/a.tif");
        let data = store.get_range(&loc, ByteRange::new(2, 3)).await.unwrap();
        assert_eq!(data.as_ref(), b"234");
    }

    #[tokio::test]
    async fn test_get_range_past_end_is_truncated() {
        let (_dir, store) = setup();
        let loc = ObjectLocation::new("2024-06/a.tif");
        let data = store.get_range(&loc, ByteRange::new(8, 100)).await.unwrap();
        assert_eq!(data.as_ref(), b"89");
        let empty = store.get_range(&loc, ByteRange::new(50, 10)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let (_dir, store) = setup();
        let loc = ObjectLocation::new("missing.tif");
        let err = store.get_object(&loc).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let (_dir, store) = setup();
        let listed = store.list("2024-06/").await.unwrap();
        let names: Vec<_> = listed.iter().map(|m| m.location.as_str()).collect();
        assert_eq!(names, vec!["2024-06/a.tif", "2024-06/b.tif"]);
        assert_eq!(listed[0].size, 10);
    }
}
