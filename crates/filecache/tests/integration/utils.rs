use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use filecache::caching::{CacheContents, CacheKey, ResourceFactory};
use filecache::files::{CachedFile, FileFactory};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `filecache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("filecache=debug"))
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory with `count` data files named `file{i}.nc`.
///
/// Every file contains its own name. Keep the returned [`TempDir`] alive for the whole test.
pub fn data_dir(count: usize) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..count {
        let name = file_name(i);
        fs::write(dir.path().join(&name), name.as_bytes()).unwrap();
    }
    dir
}

pub fn file_name(i: usize) -> String {
    format!("file{i}.nc")
}

/// A [`FileFactory`] that counts how often it actually opened a file.
#[derive(Debug)]
pub struct CountingFactory {
    inner: FileFactory,
    opens: AtomicUsize,
}

impl CountingFactory {
    pub fn new(dir: &TempDir) -> Self {
        Self {
            inner: FileFactory::with_root(dir.path()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ResourceFactory for CountingFactory {
    type Resource = CachedFile;

    fn open(&self, key: &CacheKey, cancel: &CancellationToken) -> CacheContents<CachedFile> {
        let file = self.inner.open(key, cancel)?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(file)
    }
}
