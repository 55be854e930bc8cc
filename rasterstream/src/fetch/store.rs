//! Object store abstraction.
//!
//! The store is the only component that talks to remote storage. It knows
//! nothing about retries, caching or TIFF structure: it serves byte ranges
//! and whole objects, and optionally lists keys under a prefix.
//!
//! # Dyn Compatibility
//!
//! Async methods return [`BoxFuture`] so stores can be shared as
//! `Arc<dyn ObjectStore>`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::FetchError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque handle to one stored object (a URL, a key or a relative path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectLocation(Arc<str>);

impl ObjectLocation {
    pub fn new(location: impl AsRef<str>) -> Self {
        Self(Arc::from(location.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectLocation {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ObjectLocation {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A contiguous byte range `[offset, offset + length)` inside an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True when `other` lies entirely inside this range.
    pub fn contains(&self, other: &ByteRange) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }

    /// Value for an HTTP `Range` header (inclusive end).
    pub fn http_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.end().saturating_sub(1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

/// Listing entry returned by [`ObjectStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub location: ObjectLocation,
    pub size: u64,
}

/// Read access to stored objects.
///
/// `get_range` follows HTTP semantics for ranges running past the end of the
/// object: the available bytes are returned, so the result may be shorter
/// than requested. Callers that need exact lengths check them.
pub trait ObjectStore: Send + Sync {
    /// Reads a byte range of an object.
    fn get_range<'a>(
        &'a self,
        location: &'a ObjectLocation,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>>;

    /// Reads a whole object.
    fn get_object<'a>(&'a self, location: &'a ObjectLocation)
        -> BoxFuture<'a, Result<Bytes, FetchError>>;

    /// Lists objects whose location starts with `prefix`.
    ///
    /// Stores without listing support return [`FetchError::Unsupported`].
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectMeta>, FetchError>> {
        let _ = prefix;
        Box::pin(async { Err(FetchError::Unsupported("listing".to_string())) })
    }

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Slices `data` to `range`, truncating at the end of the buffer.
pub(crate) fn slice_available(data: &Bytes, range: ByteRange) -> Bytes {
    let len = data.len() as u64;
    let start = range.offset.min(len) as usize;
    let end = range.end().min(len) as usize;
    data.slice(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_header_is_inclusive() {
        assert_eq!(ByteRange::new(100, 50).http_header(), "bytes=100-149");
    }

    #[test]
    fn test_byte_range_contains() {
        let outer = ByteRange::new(10, 100);
        assert!(outer.contains(&ByteRange::new(10, 100)));
        assert!(outer.contains(&ByteRange::new(50, 10)));
        assert!(!outer.contains(&ByteRange::new(100, 20)));
    }

    #[test]
    fn test_slice_available_truncates() {
        let data = Bytes::from_static(b"0123456789");
        assert_eq!(slice_available(&data, ByteRange::new(8, 10)).as_ref(), b"89");
        assert!(slice_available(&data, ByteRange::new(20, 5)).is_empty());
    }

    #[test]
    fn test_location_display() {
        let loc = ObjectLocation::new("2024-06/33TUN_20240615_B04.tif");
        assert_eq!(loc.to_string(), "2024-06/33TUN_20240615_B04.tif");
    }
}
