use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use super::{CacheContents, CacheKey};

/// A resource that can be held in a [`FileCache`](super::FileCache).
///
/// All hooks have defaults, so a plain value only needs an empty `impl` block. Dropping the
/// value in [`close`](Self::close) is enough for resources that do not need explicit teardown.
pub trait CacheResource: Send + 'static {
    /// Called when a client hands the resource back to the cache.
    ///
    /// Resources may give up expensive underlying state here (such as an OS file descriptor)
    /// while they sit idle. A failure causes the resource to be closed instead of being pooled.
    fn release(&mut self) -> CacheContents {
        Ok(())
    }

    /// Called before an idle resource is handed out again.
    ///
    /// Undoes whatever [`release`](Self::release) gave up. A failure causes the cached instance
    /// to be discarded and a fresh one to be opened.
    fn reacquire(&mut self) -> CacheContents {
        Ok(())
    }

    /// The modification time of the underlying data, if known.
    ///
    /// The value observed when the resource was opened is kept alongside it. An idle instance
    /// whose current value differs from that is considered stale and is reopened.
    fn last_modified(&self) -> Option<SystemTime> {
        None
    }

    /// The modification time the underlying data had when the resource was opened.
    ///
    /// This is the stamp [`last_modified`](Self::last_modified) is later compared against.
    /// Resources that capture it while opening should return it here, so that a change between
    /// opening and inserting into the cache is not missed.
    fn opened_modified(&self) -> Option<SystemTime> {
        self.last_modified()
    }

    /// Closes the resource for good.
    fn close(self) -> CacheContents
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Opens resources on behalf of a [`FileCache`](super::FileCache).
///
/// The factory is invoked without any cache lock held, so it is free to block. Implementations
/// should poll `cancel` around their slow operations and fail with
/// [`CacheError::Cancelled`](super::CacheError::Cancelled) when it fires.
pub trait ResourceFactory: Send + Sync {
    type Resource: CacheResource;

    fn open(&self, key: &CacheKey, cancel: &CancellationToken) -> CacheContents<Self::Resource>;
}

impl<F: ResourceFactory + ?Sized> ResourceFactory for &F {
    type Resource = F::Resource;

    fn open(&self, key: &CacheKey, cancel: &CancellationToken) -> CacheContents<Self::Resource> {
        (**self).open(key, cancel)
    }
}

impl<F: ResourceFactory + ?Sized> ResourceFactory for std::sync::Arc<F> {
    type Resource = F::Resource;

    fn open(&self, key: &CacheKey, cancel: &CancellationToken) -> CacheContents<Self::Resource> {
        (**self).open(key, cancel)
    }
}
