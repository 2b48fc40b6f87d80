//! Read-only views of a cache for operators.
//!
//! All of these take short-lived locks on one element at a time, so the output is consistent
//! per key but not across keys while the cache is in use.

use std::fmt::Write;
use std::time::Instant;

use serde::Serialize;

use super::cache::Tracking;
use super::stats::StatsSnapshot;
use super::{CacheResource, FileCache};

/// The state of a whole cache at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub name: String,
    pub total: usize,
    pub locked: usize,
    pub disabled: bool,
    /// One item per key, sorted by key.
    pub elements: Vec<ElementSnapshot>,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElementSnapshot {
    pub key: String,
    pub entries: Vec<EntrySnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub id: u64,
    pub locked: bool,
    pub release_count: u64,
    /// Whole seconds since the entry was last handed out or returned.
    pub idle_secs: u64,
}

impl<R: CacheResource> FileCache<R> {
    /// Captures the current entries and counters of the cache.
    pub fn snapshot(&self) -> CacheSnapshot {
        let inner = self.inner();
        let now = Instant::now();

        let mut elements: Vec<_> = inner
            .elements()
            .into_iter()
            .map(|element| {
                let state = element.lock();
                let entries: Vec<_> = state
                    .entries
                    .iter()
                    .map(|entry| EntrySnapshot {
                        id: entry.id,
                        locked: entry.is_locked(),
                        release_count: entry.release_count(),
                        idle_secs: now.saturating_duration_since(entry.last_access()).as_secs(),
                    })
                    .collect();
                (element.key.clone(), entries)
            })
            // elements that just lost their last entry are about to leave the table
            .filter(|(_, entries)| !entries.is_empty())
            .collect();
        elements.sort_by(|a, b| a.0.cmp(&b.0));

        let elements: Vec<_> = elements
            .into_iter()
            .map(|(key, entries)| ElementSnapshot {
                key: key.to_string(),
                entries,
            })
            .collect();
        let total = elements.iter().map(|e| e.entries.len()).sum();
        let locked = elements
            .iter()
            .flat_map(|e| &e.entries)
            .filter(|e| e.locked)
            .count();

        CacheSnapshot {
            name: inner.name.clone(),
            total,
            locked,
            disabled: self.is_disabled(),
            elements,
            stats: inner.stats.snapshot(),
        }
    }

    /// Lists every key with its entries, one line per entry.
    pub fn show_cache(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "FileCache {}: {} entries ({} locked), {} keys",
            snapshot.name,
            snapshot.total,
            snapshot.locked,
            snapshot.elements.len()
        );
        for element in &snapshot.elements {
            let locked = element.entries.iter().filter(|e| e.locked).count();
            let _ = writeln!(
                out,
                "  {}: {} entries ({} locked)",
                element.key,
                element.entries.len(),
                locked
            );
            for entry in &element.entries {
                let _ = writeln!(
                    out,
                    "    #{} {} releases={} idle={}s",
                    entry.id,
                    if entry.locked { "locked" } else { "idle" },
                    entry.release_count,
                    entry.idle_secs
                );
            }
        }
        out
    }

    /// Summarizes the counters and current size of the cache.
    pub fn show_stats(&self) -> String {
        let inner = self.inner();
        let stats = inner.stats.snapshot();
        let (total, locked) = inner.count_entries();
        let config = inner.config;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "FileCache {}: {} entries ({} locked), min={} max={} hard_limit={}{}",
            inner.name,
            total,
            locked,
            config.min_elements,
            config.max_elements,
            config
                .hard_limit
                .map_or_else(|| "none".to_owned(), |limit| limit.to_string()),
            if self.is_disabled() { " DISABLED" } else { "" }
        );
        let _ = writeln!(
            out,
            "  hits={} misses={} opens={} open_failures={}",
            stats.hits, stats.misses, stats.opens, stats.open_failures
        );
        let _ = writeln!(
            out,
            "  evictions={} stale={} close_failures={} detached={}",
            stats.evictions, stats.stale, stats.close_failures, stats.detached
        );
        out
    }

    /// Per-key access counts since the cache was created or tracking was last reset.
    ///
    /// Returns `None` unless [`track`](crate::config::CacheConfig::track) is enabled.
    pub fn tracking(&self) -> Option<Vec<(String, Tracking)>> {
        let counts = self.inner().tracking()?;
        Some(
            counts
                .into_iter()
                .map(|(key, counts)| (key.to_string(), counts))
                .collect(),
        )
    }

    /// Renders [`tracking`](Self::tracking) with one line per key.
    pub fn show_tracking(&self) -> String {
        let Some(counts) = self.tracking() else {
            return format!("FileCache {}: tracking disabled\n", self.name());
        };
        let mut out = format!("FileCache {}: {} tracked keys\n", self.name(), counts.len());
        for (key, counts) in counts {
            let _ = writeln!(
                out,
                "  {key}: accesses={} opens={}",
                counts.accesses, counts.opens
            );
        }
        out
    }

    /// Forgets all per-key access counts.
    pub fn reset_tracking(&self) {
        self.inner().reset_tracking();
    }
}
