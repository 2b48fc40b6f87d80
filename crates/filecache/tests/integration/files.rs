use std::fs;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use filecache::caching::{CacheError, CacheKey, FileCache};
use filecache::config::{CacheConfig, Config};
use filecache::files::CachedFile;
use tokio_util::sync::CancellationToken;

use crate::{CountingFactory, data_dir, file_name, setup};

#[tokio::test]
async fn test_shared_between_tasks() {
    setup();
    let dir = data_dir(4);
    let factory = Arc::new(CountingFactory::new(&dir));
    let cache: Arc<FileCache<CachedFile>> =
        Arc::new(FileCache::new("netcdf_files", CacheConfig::new(0, 10, None)).unwrap());

    for round in 0..3 {
        let mut tasks = vec![];
        for i in 0..4 {
            let (cache, factory) = (Arc::clone(&cache), Arc::clone(&factory));
            tasks.push(tokio::task::spawn_blocking(move || {
                let key = CacheKey::from_location(file_name(i));
                let mut file = cache
                    .acquire(&factory, &key, &CancellationToken::new())
                    .unwrap();
                let mut contents = String::new();
                file.read_to_string(&mut contents).unwrap();
                contents
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), file_name(i), "round {round}");
        }
    }

    // every file was opened exactly once and reused for the later rounds
    assert_eq!(factory.opens(), 4);
    let snapshot = cache.snapshot();
    assert_eq!(snapshot.total, 4);
    assert_eq!(snapshot.stats.hits, 8);
}

#[test]
fn test_deleted_file() {
    setup();
    let dir = data_dir(1);
    let factory = CountingFactory::new(&dir);
    let cache = FileCache::new("netcdf_files", CacheConfig::new(0, 10, None)).unwrap();
    let key = CacheKey::from_location(file_name(0));
    let cancel = CancellationToken::new();

    cache.acquire(&factory, &key, &cancel).unwrap().close();
    fs::remove_file(dir.path().join(file_name(0))).unwrap();

    // the cached instance no longer matches the file system, and reopening fails
    let result = cache.acquire(&factory, &key, &cancel);
    assert_eq!(result.unwrap_err(), CacheError::NotFound);
    assert_eq!(cache.total_entries(), 0);

    let stats = cache.snapshot().stats;
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.open_failures, 1);
}

#[test]
fn test_buffer_size_is_part_of_key() {
    setup();
    let dir = data_dir(1);
    let factory = CountingFactory::new(&dir);
    let cache = FileCache::new("netcdf_files", CacheConfig::new(0, 10, None)).unwrap();
    let cancel = CancellationToken::new();

    let small = CacheKey::builder(file_name(0)).buffer_size(4096).build();
    let large = CacheKey::builder(file_name(0)).buffer_size(65536).build();
    cache.acquire(&factory, &small, &cancel).unwrap().close();
    cache.acquire(&factory, &large, &cancel).unwrap().close();
    cache.acquire(&factory, &small, &cancel).unwrap().close();

    assert_eq!(factory.opens(), 2);
    assert_eq!(cache.snapshot().elements.len(), 2);
}

#[test]
fn test_caches_from_config() {
    setup();
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    config_file
        .write_all(
            br#"
            caches:
              netcdf_files:
                min_elements: 1
                max_elements: 2
                hard_limit: 3
                period: 1h
              http_files:
                min_elements: 25
                max_elements: 40
            "#,
        )
        .unwrap();

    let config = Config::get(Some(config_file.path())).unwrap();
    let netcdf = config.cache("netcdf_files");
    assert_eq!(netcdf.hard_limit, Some(3));
    assert_eq!(netcdf.period, Some(Duration::from_secs(3600)));
    assert_eq!(config.cache("http_files").period, Some(Duration::from_secs(600)));

    let dir = data_dir(4);
    let factory = CountingFactory::new(&dir);
    let cache = FileCache::new("netcdf_files", netcdf).unwrap();
    let cancel = CancellationToken::new();
    for i in 0..4 {
        let key = CacheKey::from_location(file_name(i));
        cache.acquire(&factory, &key, &cancel).unwrap().close();
        assert!(cache.total_entries() < 3);
    }
    cache.shutdown();
    assert_eq!(cache.total_entries(), 0);
}
