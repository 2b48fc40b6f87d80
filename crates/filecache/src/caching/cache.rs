use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;

use super::element::{CacheElement, CacheEntry};
use super::handle::{CachedResource, Lease};
use super::stats::CacheStats;
use super::sweeper::Sweeper;
use super::{CacheContents, CacheError, CacheKey, CacheResource, ResourceFactory};

/// An idle resource taken out of the cache, still to be closed.
type Closing<R> = (Arc<CacheElement<R>>, R);

/// What [`CacheInner::remove_entry`] did with an entry.
pub(super) enum Removal<R> {
    /// The entry was checked out, or already gone, and was left alone.
    Skipped,
    /// The entry was idle and its resource still has to be closed.
    Idle(R),
    /// The entry was checked out and is now detached from the cache.
    Detached,
}

/// Per-key access counters, see [`FileCache::show_tracking`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Tracking {
    pub accesses: u64,
    pub opens: u64,
}

/// A bounded pool of open resources shared between concurrent clients.
///
/// Resources are checked out with [`acquire`](Self::acquire) and returned by dropping the
/// returned [`CachedResource`]. Idle resources stay open and are handed to the next client
/// asking for the same [`CacheKey`]. Once the cache holds more than
/// [`max_elements`](CacheConfig::max_elements) entries, the background sweep closes the least
/// recently used idle ones until only [`min_elements`](CacheConfig::min_elements) are left.
///
/// The cache is meant to be shared behind an [`Arc`]. Dropping it stops the sweep and closes
/// every pooled resource.
pub struct FileCache<R: CacheResource> {
    inner: Arc<CacheInner<R>>,
    sweeper: Mutex<Option<Sweeper>>,
}

/// The state shared between the cache, its sweeper and all handed-out resources.
pub(super) struct CacheInner<R> {
    pub name: String,
    pub config: CacheConfig,
    table: RwLock<FxHashMap<CacheKey, Arc<CacheElement<R>>>>,
    total: AtomicUsize,
    next_id: AtomicU64,
    /// Serializes eviction passes.
    eviction: Mutex<()>,
    disabled: AtomicBool,
    pub stats: CacheStats,
    tracking: Option<Mutex<FxHashMap<CacheKey, Tracking>>>,
}

impl<R: CacheResource> FileCache<R> {
    /// Creates a new cache called `name` and starts its background sweep.
    ///
    /// The name is used in logs, metrics and diagnostics. The sweep only runs when
    /// [`CacheConfig::period`] is set.
    pub fn new(name: impl Into<String>, config: CacheConfig) -> io::Result<Self> {
        let config = config.normalized();
        let inner = Arc::new(CacheInner {
            name: name.into(),
            config,
            table: Default::default(),
            total: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            eviction: Mutex::new(()),
            disabled: AtomicBool::new(false),
            stats: CacheStats::default(),
            tracking: config.track.then(Default::default),
        });

        let sweeper = match config.period {
            Some(period) => {
                let weak = Arc::downgrade(&inner);
                Some(Sweeper::spawn(&inner.name, period, move || {
                    sweep(&weak)
                })?)
            }
            None => None,
        };

        tracing::debug!(
            cache = %inner.name,
            min_elements = config.min_elements,
            max_elements = config.max_elements,
            hard_limit = ?config.hard_limit,
            period = ?config.period,
            "Created file cache"
        );

        Ok(Self {
            inner,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// The name of this cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The (normalized) configuration this cache was created with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Checks out the resource for `key`, opening it through `factory` if no idle instance is
    /// available.
    ///
    /// The factory is called without holding any cache lock. Its errors, including
    /// cancellation through `cancel`, are returned as is and leave no trace in the cache.
    pub fn acquire<F>(
        &self,
        factory: &F,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> CacheContents<CachedResource<R>>
    where
        F: ResourceFactory<Resource = R> + ?Sized,
    {
        self.inner.acquire(factory, key, cancel)
    }

    /// Closes least recently used idle resources if the cache holds more than `trigger`
    /// entries, until it is down to [`min_elements`](CacheConfig::min_elements).
    ///
    /// Returns the number of entries that were removed.
    pub fn cleanup(&self, trigger: usize) -> usize {
        self.inner.cleanup(trigger)
    }

    /// Removes every idle entry from the cache.
    ///
    /// With `force`, entries that are currently checked out are removed as well. Their holders
    /// keep using the resource, which is closed instead of pooled when they release it. This is
    /// meant for shutdown: resources opened for the same key afterwards are not shared with
    /// those detached ones.
    ///
    /// Returns the number of entries that were removed.
    pub fn clear_cache(&self, force: bool) -> usize {
        self.inner.evict(0, force)
    }

    /// Closes all idle resources of `key`, returning how many were removed.
    ///
    /// Checked-out resources of the key stay in the cache.
    pub fn eject(&self, key: &CacheKey) -> usize {
        self.inner.eject(key)
    }

    /// Turns the cache into a pass-through.
    ///
    /// All entries are cleared forcibly and subsequent acquires open resources directly, closing
    /// them on release.
    pub fn disable(&self) {
        self.inner.disabled.store(true, Ordering::Release);
        let removed = self.inner.evict(0, true);
        tracing::info!(cache = %self.inner.name, removed, "Disabled file cache");
    }

    /// Whether [`disable`](Self::disable) or [`shutdown`](Self::shutdown) was called.
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::Acquire)
    }

    /// Stops the background sweep, disables the cache and closes everything still in it.
    ///
    /// An in-flight sweep is allowed to complete. This is also done when the cache is dropped.
    pub fn shutdown(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
        self.inner.disabled.store(true, Ordering::Release);
        let removed = self.inner.evict(0, true);
        if removed > 0 {
            tracing::info!(cache = %self.inner.name, removed, "Closed file cache");
        }
    }

    /// The number of entries, both idle and checked out, across all keys.
    pub fn total_entries(&self) -> usize {
        self.inner.total()
    }

    pub(super) fn inner(&self) -> &CacheInner<R> {
        &self.inner
    }
}

impl<R: CacheResource> Drop for FileCache<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One iteration of the background sweep. Returns `false` once the cache is gone.
fn sweep<R: CacheResource>(cache: &Weak<CacheInner<R>>) -> bool {
    let Some(cache) = cache.upgrade() else {
        return false;
    };
    let start = Instant::now();
    let removed = cache.cleanup(cache.config.max_elements);
    let (total, locked) = cache.count_entries();

    metric!(gauge("caches.entries") = total as u64, "cache" => &cache.name);
    metric!(gauge("caches.entries.locked") = locked as u64, "cache" => &cache.name);
    if removed > 0 {
        tracing::info!(
            cache = %cache.name,
            removed,
            remaining = total,
            locked,
            duration = ?start.elapsed(),
            "Swept file cache"
        );
    }
    true
}

impl<R: CacheResource> CacheInner<R> {
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn acquire<F>(
        self: &Arc<Self>,
        factory: &F,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> CacheContents<CachedResource<R>>
    where
        F: ResourceFactory<Resource = R> + ?Sized,
    {
        metric!(counter("caches.access") += 1, "cache" => &self.name);
        self.track(key, |t| t.accesses += 1);

        if self.disabled.load(Ordering::Acquire) {
            let resource = self.open(factory, key, cancel)?;
            return Ok(CachedResource::uncached(
                Arc::clone(self),
                key.clone(),
                resource,
            ));
        }

        while let Some(element) = self.lookup(key) {
            let claimed = {
                let state = element.lock();
                if state.retired {
                    continue;
                }
                state
                    .entries
                    .iter()
                    .find_map(|entry| entry.try_claim().map(|res| (Arc::clone(entry), res)))
            };
            let Some((entry, resource)) = claimed else {
                break;
            };

            if let Some(resource) = self.revalidate(key, &entry, resource) {
                CacheStats::incr(&self.stats.hits);
                metric!(counter("caches.memory.hit") += 1, "cache" => &self.name);
                let lease = Lease { element, entry };
                return Ok(CachedResource::cached(
                    Arc::clone(self),
                    key.clone(),
                    resource,
                    lease,
                ));
            }
            self.discard(&element, &entry);
        }

        CacheStats::incr(&self.stats.misses);
        let resource = self.open(factory, key, cancel)?;
        let entry = Arc::new(CacheEntry::new_locked(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            resource.opened_modified(),
        ));
        let Some((element, total)) = self.insert(key, Arc::clone(&entry)) else {
            // the cache was disabled while the resource was being opened
            return Ok(CachedResource::uncached(
                Arc::clone(self),
                key.clone(),
                resource,
            ));
        };
        tracing::trace!(cache = %self.name, %key, id = entry.id, total, "Added cache entry");

        if let Some(hard_limit) = self.config.hard_limit {
            if total >= hard_limit {
                self.cleanup(hard_limit - 1);
            }
        }

        let lease = Lease { element, entry };
        Ok(CachedResource::cached(
            Arc::clone(self),
            key.clone(),
            resource,
            lease,
        ))
    }

    fn open<F>(&self, factory: &F, key: &CacheKey, cancel: &CancellationToken) -> CacheContents<R>
    where
        F: ResourceFactory<Resource = R> + ?Sized,
    {
        if cancel.is_cancelled() {
            CacheStats::incr(&self.stats.open_failures);
            return Err(CacheError::Cancelled);
        }
        let start = Instant::now();
        match factory.open(key, cancel) {
            Ok(resource) => {
                CacheStats::incr(&self.stats.opens);
                self.track(key, |t| t.opens += 1);
                metric!(counter("caches.open") += 1, "cache" => &self.name);
                metric!(timer("caches.open.duration") = start.elapsed(), "cache" => &self.name);
                Ok(resource)
            }
            Err(err) => {
                CacheStats::incr(&self.stats.open_failures);
                metric!(counter("caches.open.error") += 1, "cache" => &self.name);
                tracing::debug!(cache = %self.name, %key, error = %err, "Failed to open resource");
                Err(err)
            }
        }
    }

    /// Readies an idle resource for reuse, closing it if it went stale.
    fn revalidate(&self, key: &CacheKey, entry: &CacheEntry<R>, mut resource: R) -> Option<R> {
        if resource.last_modified() != entry.last_modified {
            CacheStats::incr(&self.stats.stale);
            metric!(counter("caches.stale") += 1, "cache" => &self.name);
            tracing::debug!(cache = %self.name, %key, id = entry.id, "Cached resource is stale");
            self.close_resource(key, resource);
            return None;
        }
        if let Err(err) = resource.reacquire() {
            CacheStats::incr(&self.stats.stale);
            tracing::warn!(cache = %self.name, %key, error = %err, "Failed to reacquire cached resource");
            self.close_resource(key, resource);
            return None;
        }
        Some(resource)
    }

    /// Hands a resource back to its entry.
    pub fn release(&self, lease: Lease<R>, mut resource: R) {
        let Lease { element, entry } = lease;
        if let Err(err) = resource.release() {
            tracing::warn!(cache = %self.name, key = %element.key, error = %err, "Failed to release cached resource");
            self.discard(&element, &entry);
            self.close_resource(&element.key, resource);
            return;
        }

        let state = element.lock();
        let resource = if state.contains(&entry) {
            match entry.unlock(resource) {
                Ok(()) => return,
                Err(resource) => resource,
            }
        } else {
            CacheStats::incr(&self.stats.detached);
            resource
        };
        drop(state);
        self.close_resource(&element.key, resource);
    }

    /// Closes a resource that no longer belongs to the cache.
    pub fn close_resource(&self, key: &CacheKey, resource: R) {
        if let Err(err) = resource.close() {
            CacheStats::incr(&self.stats.close_failures);
            tracing::error!(cache = %self.name, %key, error = %err, "Failed to close resource");
        }
    }

    fn track(&self, key: &CacheKey, f: impl FnOnce(&mut Tracking)) {
        if let Some(tracking) = &self.tracking {
            let mut tracking = tracking.lock().unwrap();
            match tracking.get_mut(key) {
                Some(counts) => f(counts),
                None => f(tracking.entry(key.clone()).or_default()),
            }
        }
    }

    pub fn tracking(&self) -> Option<Vec<(CacheKey, Tracking)>> {
        let tracking = self.tracking.as_ref()?.lock().unwrap();
        let mut counts: Vec<_> = tracking.iter().map(|(k, t)| (k.clone(), *t)).collect();
        counts.sort_by(|a, b| a.0.cmp(&b.0));
        Some(counts)
    }

    pub fn reset_tracking(&self) {
        if let Some(tracking) = &self.tracking {
            tracking.lock().unwrap().clear();
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheElement<R>>> {
        self.table.read().unwrap().get(key).cloned()
    }

    /// Adds an entry to the element of `key`, creating the element if needed.
    ///
    /// Returns the element along with the new total number of entries, or `None` if the cache
    /// is disabled.
    fn insert(
        &self,
        key: &CacheKey,
        entry: Arc<CacheEntry<R>>,
    ) -> Option<(Arc<CacheElement<R>>, usize)> {
        let mut table = self.table.write().unwrap();
        // `disable` sets the flag before its forced clear reads the table
        if self.disabled.load(Ordering::Acquire) {
            return None;
        }
        let element = table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CacheElement::new(key.clone())));
        let mut state = element.lock();
        state.entries.push(entry);
        // counted under the element lock, so that removals never see the entry uncounted
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        drop(state);
        Some((Arc::clone(element), total))
    }

    /// Drops an entry from the cache without closing its resource.
    fn discard(&self, element: &Arc<CacheElement<R>>, entry: &Arc<CacheEntry<R>>) {
        let removed = element.lock().remove(entry);
        if removed {
            self.total.fetch_sub(1, Ordering::AcqRel);
            self.remove_element_if_empty(element);
        }
    }

    /// Removes an element from the table once its last entry is gone.
    fn remove_element_if_empty(&self, element: &Arc<CacheElement<R>>) {
        {
            let state = element.lock();
            if !state.entries.is_empty() || state.retired {
                return;
            }
        }
        // checked again, an entry may have been added before the table lock was taken
        let mut table = self.table.write().unwrap();
        let mut state = element.lock();
        if !state.entries.is_empty() || state.retired {
            return;
        }
        state.retired = true;
        let is_current = table
            .get(&element.key)
            .is_some_and(|current| Arc::ptr_eq(current, element));
        if is_current {
            table.remove(&element.key);
        }
    }

    pub fn cleanup(&self, trigger: usize) -> usize {
        if self.total() <= trigger {
            return 0;
        }
        self.evict(self.config.min_elements, false)
    }

    /// Removes least recently used entries until at most `target` are left.
    ///
    /// Only idle entries are considered unless `force` is set.
    pub fn evict(&self, target: usize, force: bool) -> usize {
        let (removed, closing) = self.evict_entries(target, force);
        self.close_all(closing);

        if removed > 0 {
            CacheStats::add(&self.stats.evictions, removed as u64);
            metric!(counter("caches.evicted") += removed as i64, "cache" => &self.name);
            tracing::debug!(
                cache = %self.name,
                removed,
                target,
                force,
                remaining = self.total(),
                "Evicted cache entries"
            );
        }
        removed
    }

    /// Takes entries out of the cache for [`evict`](Self::evict), returning the number of removed
    /// entries and the idle resources among them.
    fn evict_entries(&self, target: usize, force: bool) -> (usize, Vec<Closing<R>>) {
        let _guard = self.eviction_guard();
        if !force && self.total() <= target {
            return (0, vec![]);
        }

        let elements = self.elements();
        let mut candidates = vec![];
        for element in &elements {
            let state = element.lock();
            for entry in &state.entries {
                if force || !entry.is_locked() {
                    candidates.push((entry.last_access(), Arc::clone(element), Arc::clone(entry)));
                }
            }
        }
        candidates.sort_by_key(|(last_access, ..)| *last_access);

        let mut removed = 0;
        let mut closing = vec![];
        for (_, element, entry) in candidates {
            if self.total() <= target {
                break;
            }
            match self.remove_entry(&element, &entry, force) {
                Removal::Skipped => continue,
                Removal::Idle(resource) => closing.push((element, resource)),
                Removal::Detached => {}
            }
            removed += 1;
        }
        (removed, closing)
    }

    /// Removes all idle entries of a single key.
    pub fn eject(&self, key: &CacheKey) -> usize {
        let closing = {
            let _guard = self.eviction_guard();
            let Some(element) = self.lookup(key) else {
                return 0;
            };
            let idle: Vec<_> = element
                .lock()
                .entries
                .iter()
                .filter(|entry| !entry.is_locked())
                .cloned()
                .collect();

            let mut closing = vec![];
            for entry in &idle {
                if let Removal::Idle(resource) = self.remove_entry(&element, entry, false) {
                    closing.push((Arc::clone(&element), resource));
                }
            }
            closing
        };

        let removed = closing.len();
        self.close_all(closing);
        if removed > 0 {
            CacheStats::add(&self.stats.evictions, removed as u64);
            metric!(counter("caches.evicted") += removed as i64, "cache" => &self.name);
            tracing::debug!(cache = %self.name, %key, removed, "Ejected cache entries");
        }
        removed
    }

    /// Serializes eviction passes.
    ///
    /// The guarded state is `()`, so a pass that panicked leaves nothing inconsistent behind.
    fn eviction_guard(&self) -> MutexGuard<'_, ()> {
        self.eviction.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes resources that were taken out of the cache, outside of any cache lock.
    fn close_all(&self, closing: Vec<Closing<R>>) {
        for (element, resource) in closing {
            self.close_resource(&element.key, resource);
        }
    }

    /// Removes one entry after re-checking it under the element lock.
    ///
    /// Entries that are checked out are only removed with `force`. Their resource is closed by
    /// the holder on release. The resource of an idle entry is handed back to the caller, who
    /// has to close it.
    pub fn remove_entry(
        &self,
        element: &Arc<CacheElement<R>>,
        entry: &Arc<CacheEntry<R>>,
        force: bool,
    ) -> Removal<R> {
        let resource = {
            let mut state = element.lock();
            if !state.contains(entry) || (!force && entry.is_locked()) {
                return Removal::Skipped;
            }
            state.remove(entry);
            self.total.fetch_sub(1, Ordering::AcqRel);
            entry.resource.lock().unwrap().take()
        };
        self.remove_element_if_empty(element);

        match resource {
            Some(resource) => Removal::Idle(resource),
            None => {
                tracing::debug!(
                    cache = %self.name,
                    key = %element.key,
                    id = entry.id,
                    "Detached checked-out cache entry"
                );
                Removal::Detached
            }
        }
    }

    /// Counts all entries and the locked ones among them.
    pub fn count_entries(&self) -> (usize, usize) {
        self.elements().iter().fold((0, 0), |(total, locked), element| {
            let state = element.lock();
            (total + state.entries.len(), locked + state.locked_count())
        })
    }

    /// A snapshot of all elements in the table.
    pub fn elements(&self) -> Vec<Arc<CacheElement<R>>> {
        self.table.read().unwrap().values().cloned().collect()
    }
}
