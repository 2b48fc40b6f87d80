//! Read-only files as cacheable resources.
//!
//! A [`CachedFile`] keeps its OS file descriptor only while it is checked out. Idle files in
//! the cache give their descriptor back, which keeps the number of open descriptors bounded by
//! the number of concurrent readers rather than by the size of the cache.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::caching::{CacheContents, CacheError, CacheKey, CacheResource, ResourceFactory};

/// A read-only, random-access file.
#[derive(Debug)]
pub struct CachedFile {
    path: PathBuf,
    file: Option<File>,
    modified: Option<SystemTime>,
    len: u64,
}

impl CachedFile {
    /// Opens the file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            ));
        }
        Ok(Self {
            path,
            file: Some(file),
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The size of the file when it was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the file currently holds an OS file descriptor.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn file(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.path)?,
        };
        Ok(self.file.insert(file))
    }
}

impl Read for CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }
}

impl Seek for CachedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file()?.seek(pos)
    }
}

impl CacheResource for CachedFile {
    fn release(&mut self) -> CacheContents {
        self.file = None;
        Ok(())
    }

    fn reacquire(&mut self) -> CacheContents {
        // Every client starts reading at the beginning.
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    fn last_modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).ok()?.modified().ok()
    }

    fn opened_modified(&self) -> Option<SystemTime> {
        self.modified
    }

    fn close(self) -> CacheContents {
        drop(self.file);
        Ok(())
    }
}

/// Opens [`CachedFile`]s for keys whose location is a file system path.
#[derive(Debug, Clone, Default)]
pub struct FileFactory {
    root: Option<PathBuf>,
}

impl FileFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative key locations against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, key: &CacheKey) -> PathBuf {
        let location = Path::new(key.location());
        match &self.root {
            Some(root) if location.is_relative() => root.join(location),
            _ => location.to_owned(),
        }
    }
}

impl ResourceFactory for FileFactory {
    type Resource = CachedFile;

    fn open(&self, key: &CacheKey, cancel: &CancellationToken) -> CacheContents<CachedFile> {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let path = self.resolve(key);
        let file = match CachedFile::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
                return Err(CacheError::Unsupported(err.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        tracing::trace!(path = %path.display(), len = file.len(), "Opened file");
        Ok(file)
    }
}
