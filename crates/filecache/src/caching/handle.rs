use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::cache::CacheInner;
use super::element::{CacheElement, CacheEntry};
use super::{CacheKey, CacheResource};

/// Ties a handed-out resource to the entry it has to be returned to.
pub(super) struct Lease<R> {
    pub element: Arc<CacheElement<R>>,
    pub entry: Arc<CacheEntry<R>>,
}

/// A resource checked out of a [`FileCache`](super::FileCache).
///
/// The holder has exclusive access to the resource. Dropping the handle, or calling
/// [`close`](Self::close), returns the resource to the cache for reuse instead of closing it.
/// Handles obtained from a disabled cache are not pooled and close their resource on drop.
pub struct CachedResource<R: CacheResource> {
    resource: Option<R>,
    key: CacheKey,
    cache: Arc<CacheInner<R>>,
    lease: Option<Lease<R>>,
}

impl<R: CacheResource> CachedResource<R> {
    pub(super) fn cached(
        cache: Arc<CacheInner<R>>,
        key: CacheKey,
        resource: R,
        lease: Lease<R>,
    ) -> Self {
        Self {
            resource: Some(resource),
            key,
            cache,
            lease: Some(lease),
        }
    }

    pub(super) fn uncached(cache: Arc<CacheInner<R>>, key: CacheKey, resource: R) -> Self {
        Self {
            resource: Some(resource),
            key,
            cache,
            lease: None,
        }
    }

    /// The key this resource was acquired for.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Whether the resource goes back into the cache once released.
    pub fn is_cached(&self) -> bool {
        self.lease.is_some()
    }

    /// The id of the cache entry backing this handle, if it is pooled.
    ///
    /// Ids are unique per cache, so two handles with the same id share the same instance.
    pub fn entry_id(&self) -> Option<u64> {
        self.lease.as_ref().map(|lease| lease.entry.id)
    }

    /// Returns the resource to the cache.
    pub fn close(self) {
        drop(self)
    }
}

impl<R: CacheResource> Deref for CachedResource<R> {
    type Target = R;

    fn deref(&self) -> &R {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("resource is only taken on drop"),
        }
    }
}

impl<R: CacheResource> DerefMut for CachedResource<R> {
    fn deref_mut(&mut self) -> &mut R {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("resource is only taken on drop"),
        }
    }
}

impl<R: CacheResource> Drop for CachedResource<R> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        match self.lease.take() {
            Some(lease) => self.cache.release(lease, resource),
            None => self.cache.close_resource(&self.key, resource),
        }
    }
}

impl<R: CacheResource + fmt::Debug> fmt::Debug for CachedResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResource")
            .field("key", &self.key.location())
            .field("entry_id", &self.entry_id())
            .field("resource", &self.resource)
            .finish()
    }
}
