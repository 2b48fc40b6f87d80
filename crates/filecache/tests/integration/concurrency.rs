use std::sync::Arc;
use std::thread;
use std::time::Duration;

use filecache::caching::{CacheError, CacheKey, FileCache};
use filecache::config::CacheConfig;
use filecache::files::CachedFile;
use tokio_util::sync::CancellationToken;

use crate::{CountingFactory, data_dir, file_name, setup};

#[test]
fn test_hammering_with_hard_limit() {
    setup();
    let dir = data_dir(20);
    let factory = CountingFactory::new(&dir);
    let config = CacheConfig {
        hard_limit: Some(12),
        ..CacheConfig::new(4, 8, Some(Duration::from_millis(5)))
    };
    let cache = FileCache::new("hammer", config).unwrap();
    let cancel = CancellationToken::new();

    thread::scope(|s| {
        for worker in 0..8 {
            let (cache, factory, cancel) = (&cache, &factory, &cancel);
            s.spawn(move || {
                for i in 0..300 {
                    let key = CacheKey::from_location(file_name((worker * 7 + i * 3) % 20));
                    let mut file = cache.acquire(factory, &key, cancel).unwrap();
                    let mut byte = [0; 1];
                    file.read_at(0, &mut byte).unwrap();
                    assert_eq!(&byte, b"f");

                    // threads racing past the limit overshoot it by what they hold and insert
                    assert!(cache.total_entries() <= 12 + 2 * 8);
                    if i % 50 == 0 {
                        cache.clear_cache(false);
                    }
                }
            });
        }
    });

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.locked, 0);
    let stats = snapshot.stats;
    assert_eq!(stats.opens as usize, factory.opens());
    assert_eq!(
        stats.opens,
        snapshot.total as u64 + stats.evictions + stats.stale
    );

    cache.clear_cache(false);
    let stats = cache.snapshot().stats;
    assert_eq!(stats.opens, stats.evictions + stats.stale);
    assert_eq!(stats.detached, 0);
}

#[test]
fn test_forced_clear_under_load() {
    setup();
    let dir = data_dir(5);
    let factory = CountingFactory::new(&dir);
    let cache: Arc<FileCache<CachedFile>> =
        Arc::new(FileCache::new("forced", CacheConfig::new(0, 100, None)).unwrap());
    let cancel = CancellationToken::new();

    thread::scope(|s| {
        for worker in 0..4 {
            let (cache, factory, cancel) = (&cache, &factory, &cancel);
            s.spawn(move || {
                for i in 0..200 {
                    let key = CacheKey::from_location(file_name((worker + i) % 5));
                    let mut file = cache.acquire(factory, &key, cancel).unwrap();
                    // the resource stays usable even if it was detached meanwhile
                    let mut byte = [0; 1];
                    file.read_at(0, &mut byte).unwrap();
                }
            });
        }
        s.spawn(|| {
            for _ in 0..20 {
                cache.clear_cache(true);
                thread::sleep(Duration::from_millis(1));
            }
        });
    });

    let stats = cache.snapshot().stats;
    assert_eq!(
        stats.opens,
        cache.total_entries() as u64 + stats.evictions + stats.stale
    );
}

#[tokio::test]
async fn test_cancelled_acquires() {
    setup();
    let dir = data_dir(3);
    let factory = Arc::new(CountingFactory::new(&dir));
    let cache: Arc<FileCache<CachedFile>> =
        Arc::new(FileCache::new("cancel", CacheConfig::new(0, 10, None)).unwrap());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut tasks = vec![];
    for i in 0..3 {
        let (cache, factory, cancel) = (Arc::clone(&cache), Arc::clone(&factory), cancel.clone());
        tasks.push(tokio::task::spawn_blocking(move || {
            let key = CacheKey::from_location(file_name(i));
            cache.acquire(&factory, &key, &cancel).map(|file| file.len())
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), Err(CacheError::Cancelled));
    }

    assert_eq!(factory.opens(), 0);
    assert_eq!(cache.total_entries(), 0);
    assert!(cache.snapshot().elements.is_empty());
}
