//! Shared fill buffer

use bytes::Bytes;

/// Immutable payload block repeated by every download session
///
/// Cloning shares the allocation; the content never changes after
/// construction.
#[derive(Debug, Clone)]
pub struct FillBuffer {
    bytes: Bytes,
}

impl FillBuffer {
    /// Allocate a buffer of `size` bytes with a deterministic pattern
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "fill buffer size must be > 0");

        // 0..=250 repeating; period is prime so it never lines up with the chunk size
        let pattern: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        Self {
            bytes: Bytes::from(pattern),
        }
    }

    /// Size of one chunk in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; kept for API symmetry with `len`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hand out one chunk without copying
    #[must_use]
    pub fn chunk(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Borrow the raw content
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}
