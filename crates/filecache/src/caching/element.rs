use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use super::CacheKey;

/// One opened resource instance together with its lock flag and usage statistics.
///
/// While a client holds the instance, the `resource` slot is empty and the resource lives in the
/// client's [`CachedResource`](super::CachedResource). The slot is only read or written with the
/// owning element's lock held.
pub(super) struct CacheEntry<R> {
    pub id: u64,
    locked: AtomicBool,
    release_count: AtomicU64,
    last_access: Mutex<Instant>,
    /// The modification stamp the resource reported when it was opened.
    pub last_modified: Option<SystemTime>,
    pub resource: Mutex<Option<R>>,
}

impl<R> CacheEntry<R> {
    /// Creates an entry for a freshly opened resource that is handed out right away.
    pub fn new_locked(id: u64, last_modified: Option<SystemTime>) -> Self {
        Self {
            id,
            locked: AtomicBool::new(true),
            release_count: AtomicU64::new(0),
            last_access: Mutex::new(Instant::now()),
            last_modified,
            resource: Mutex::new(None),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn release_count(&self) -> u64 {
        self.release_count.load(Ordering::Relaxed)
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock().unwrap()
    }

    pub fn touch(&self) {
        *self.last_access.lock().unwrap() = Instant::now();
    }

    /// Locks an idle entry and takes its resource out of the slot.
    ///
    /// Must be called with the element lock held.
    pub fn try_claim(&self) -> Option<R> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let resource = self.resource.lock().unwrap().take();
        match resource {
            Some(resource) => {
                self.touch();
                Some(resource)
            }
            None => {
                self.locked.store(false, Ordering::Release);
                None
            }
        }
    }

    /// Puts a resource back into the slot and unlocks the entry.
    ///
    /// Must be called with the element lock held. Unlocking an entry that is not locked is a
    /// no-op and hands the resource back to the caller.
    pub fn unlock(&self, resource: R) -> Result<(), R> {
        if !self.is_locked() {
            return Err(resource);
        }
        *self.resource.lock().unwrap() = Some(resource);
        self.touch();
        self.release_count.fetch_add(1, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        Ok(())
    }

    #[cfg(test)]
    pub fn set_last_access(&self, instant: Instant) {
        *self.last_access.lock().unwrap() = instant;
    }
}

/// All cached instances of one key.
pub(super) struct CacheElement<R> {
    pub key: CacheKey,
    state: Mutex<ElementState<R>>,
}

pub(super) struct ElementState<R> {
    /// The entries in insertion order.
    pub entries: Vec<Arc<CacheEntry<R>>>,
    /// Set once the element has been removed from the table. Holders of a stale reference must
    /// look the key up again.
    pub retired: bool,
}

impl<R> ElementState<R> {
    pub fn position(&self, entry: &Arc<CacheEntry<R>>) -> Option<usize> {
        self.entries.iter().position(|e| Arc::ptr_eq(e, entry))
    }

    pub fn contains(&self, entry: &Arc<CacheEntry<R>>) -> bool {
        self.position(entry).is_some()
    }

    /// Removes `entry`, returning whether it was still part of this element.
    pub fn remove(&mut self, entry: &Arc<CacheEntry<R>>) -> bool {
        match self.position(entry) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn locked_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_locked()).count()
    }
}

impl<R> CacheElement<R> {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            state: Mutex::new(ElementState {
                entries: Vec::new(),
                retired: false,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ElementState<R>> {
        self.state.lock().unwrap()
    }
}
