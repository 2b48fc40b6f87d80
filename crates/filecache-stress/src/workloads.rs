use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use filecache::caching::{
    CacheContents, CacheError, CacheKey, CacheResource, FileCache, ResourceFactory,
};
use filecache::files::{CachedFile, FileFactory};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

fn default_cache() -> String {
    "netcdf_files".into()
}

fn default_file_size() -> usize {
    64 * 1024
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The name of the cache config to use. Workloads naming the same cache share it.
    #[serde(default = "default_cache")]
    pub cache: String,
    /// The number of distinct files to spread the requests over.
    pub files: usize,
    #[serde(default = "default_file_size")]
    pub file_size: usize,
    /// How long each request holds on to its file.
    #[serde(default, with = "humantime_serde")]
    pub hold: Duration,
    /// Additional latency of every open, simulating header parsing.
    #[serde(default, with = "humantime_serde")]
    pub open_latency: Duration,
}

/// A workload with its data files written out to a temporary directory.
pub struct PreparedWorkload {
    pub files: usize,
    pub file_size: usize,
    pub hold: Duration,
    pub factory: SimulatedFactory,
    _dir: TempDir,
}

pub fn prepare_workload(workload: &Workload) -> Result<PreparedWorkload> {
    if workload.files == 0 || workload.concurrency == 0 {
        anyhow::bail!("workloads need at least one file and a concurrency of at least one");
    }
    let dir = tempfile::tempdir().context("failed to create workload directory")?;
    let mut rng = rand::rng();
    for i in 0..workload.files {
        let mut contents = vec![0u8; workload.file_size];
        rng.fill(&mut contents[..]);
        fs::write(dir.path().join(file_name(i)), contents)
            .context("failed to write workload file")?;
    }

    Ok(PreparedWorkload {
        files: workload.files,
        file_size: workload.file_size,
        hold: workload.hold,
        factory: SimulatedFactory {
            inner: FileFactory::with_root(dir.path()),
            open_latency: workload.open_latency,
        },
        _dir: dir,
    })
}

fn file_name(i: usize) -> String {
    format!("data{i:04}.nc")
}

/// Opens files like [`FileFactory`], but takes additional time doing so.
pub struct SimulatedFactory {
    inner: FileFactory,
    open_latency: Duration,
}

impl ResourceFactory for SimulatedFactory {
    type Resource = CachedFile;

    fn open(&self, key: &CacheKey, cancel: &CancellationToken) -> CacheContents<CachedFile> {
        let file = self.inner.open(key, cancel)?;
        if !self.open_latency.is_zero() {
            thread::sleep(self.open_latency);
            if cancel.is_cancelled() {
                // the simulated parse was abandoned, nobody will ever see this file
                let path = file.path().to_owned();
                if let Err(err) = file.close() {
                    tracing::error!(path = %path.display(), error = %err, "Failed to close file");
                }
                return Err(CacheError::Cancelled);
            }
        }
        Ok(file)
    }
}

/// Performs one request: acquires a random file, reads a random chunk and holds on to it.
///
/// This blocks, and has to be run on a blocking thread.
pub fn process_request(
    cache: &FileCache<CachedFile>,
    workload: &PreparedWorkload,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut rng = rand::rng();
    let key = CacheKey::builder(file_name(rng.random_range(0..workload.files)))
        .buffer_size(8192)
        .build();

    let mut file = cache.acquire(&workload.factory, &key, cancel)?;

    let chunk = workload.file_size.min(4096);
    let offset = rng.random_range(0..=workload.file_size - chunk) as u64;
    let mut buf = vec![0; chunk];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;

    if !workload.hold.is_zero() {
        thread::sleep(workload.hold);
    }
    Ok(())
}
