use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Identifies a resource: its location plus the parameters it was opened with.
///
/// Two keys are equal if their location and all parameters written into the
/// [`CacheKeyBuilder`] are equal. Equal keys may share an idle cached instance.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    location: Arc<str>,
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.location, &self.hash).cmp(&(&other.location, &other.hash))
    }
}

impl CacheKey {
    /// Creates a [`CacheKey`] for a location opened with default parameters.
    pub fn from_location(location: impl Into<String>) -> Self {
        Self::builder(location).build()
    }

    /// Create a [`CacheKeyBuilder`] that can be used to add open parameters to the key.
    pub fn builder(location: impl Into<String>) -> CacheKeyBuilder {
        let location = location.into();
        let metadata = format!("location: {location}\n");
        CacheKeyBuilder { location, metadata }
    }

    /// Returns the location of the resource, usually a path or URL.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns the human-readable metadata that forms the basis of the [`CacheKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the hex-formatted sha-256 hash of the key.
    pub fn hash_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in &self.hash {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

/// A builder for [`CacheKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the intention of it is to
/// accept human readable, but most importantly **stable**, input describing the open
/// parameters. This input is then hashed to form the [`CacheKey`].
pub struct CacheKeyBuilder {
    location: String,
    metadata: String,
}

impl CacheKeyBuilder {
    /// Records the buffer size the resource will be opened with.
    pub fn buffer_size(mut self, size: usize) -> Self {
        let _ = writeln!(self.metadata, "buffer_size: {size}");
        self
    }

    /// Records an opaque open option.
    pub fn option(mut self, name: &str, value: impl fmt::Display) -> Self {
        let _ = writeln!(self.metadata, "{name}: {value}");
        self
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let hash: [u8; 32] = Sha256::digest(&self.metadata).into();

        CacheKey {
            location: self.location.into(),
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
