//! # Resource caching
//!
//! Opening a data file is expensive: the file has to be found and opened, and format readers
//! parse headers and build indices before the first byte of data can be served. At the same
//! time, the number of simultaneously open files is bounded by the operating system. A
//! [`FileCache`] keeps opened resources around after a client is done with them, so that the
//! next request for the same file can skip all of that work, while bounding the total number of
//! open resources.
//!
//! ## Structure
//!
//! A cache maps a [`CacheKey`] (location plus open parameters) to an element holding zero or
//! more entries, each wrapping one opened resource. Every entry is either idle or locked by
//! exactly one client. Concurrent clients asking for the same key get separate instances, so
//! the number of entries per key grows with the peak concurrency for that key.
//!
//! - [`FileCache::acquire`] hands out an idle instance if one exists, or opens a new one through
//!   a [`ResourceFactory`]. Factories run without any cache lock held.
//! - Dropping the returned [`CachedResource`] returns the instance to the cache, calling
//!   [`CacheResource::release`] so it can give up expensive state while idle.
//! - An instance is only ever closed by eviction, clearing or ejection, and never while a
//!   client is using it.
//!
//! Lookups take a shared lock on the key table. Structural changes to the entries of one key
//! take that key's lock. The table lock is always taken before an element lock.
//!
//! ## Eviction
//!
//! The cache is bounded by two watermarks from [`CacheConfig`](crate::config::CacheConfig).
//! A background sweep wakes up every `period` and, if there are more than `max_elements`
//! entries, closes the least recently used idle ones until `min_elements` are left. With a
//! `hard_limit`, the acquire that reaches it does the same synchronously.
//!
//! An idle instance whose [`CacheResource::last_modified`] changed since it was opened is stale
//! and is closed and reopened on its next acquire.
//!
//! ### Metrics
//!
//! All metrics are tagged with a `cache` field containing the name of the cache:
//!
//! - `caches.access`: All acquires.
//! - `caches.memory.hit`: Acquires served by an idle cached instance.
//! - `caches.open`: Resources opened through the factory, and `caches.open.duration` for the
//!   time that took.
//! - `caches.open.error`: Failed or cancelled opens.
//! - `caches.evicted`: Entries removed by eviction, clearing or ejection.
//! - `caches.stale`: Cached instances discarded because they went stale.
//! - `caches.entries` and `caches.entries.locked`: Gauges of the cache size after each sweep.

mod cache;
mod cache_error;
mod cache_key;
mod diagnostics;
mod element;
mod handle;
mod resource;
mod stats;
mod sweeper;

pub use cache::{FileCache, Tracking};
pub use cache_error::{CacheContents, CacheError};
pub use cache_key::{CacheKey, CacheKeyBuilder};
pub use diagnostics::{CacheSnapshot, ElementSnapshot, EntrySnapshot};
pub use handle::CachedResource;
pub use resource::{CacheResource, ResourceFactory};
pub use stats::StatsSnapshot;
