//! File access for firmware images, register scripts and log sinks.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A readable image with a known size.
pub trait ImageFile: Read + Send {
    fn size(&self) -> io::Result<u64>;
}

/// Log sink handed out by [`FileSystem::create`].
pub type LogSink = Box<dyn Write + Send>;

/// Host file access.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Box<dyn ImageFile>>;

    /// Create (or truncate) a file for writing.
    fn create(&self, path: &Path) -> io::Result<LogSink>;

    fn read_to_end(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut file = self.open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl ImageFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// `std::fs` backed file access.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn open(&self, path: &Path) -> io::Result<Box<dyn ImageFile>> {
        Ok(Box::new(File::open(path)?))
    }

    fn create(&self, path: &Path) -> io::Result<LogSink> {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

struct MemoryImage {
    data: Cursor<Vec<u8>>,
}

impl Read for MemoryImage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl ImageFile for MemoryImage {
    fn size(&self) -> io::Result<u64> {
        Ok(self.data.get_ref().len() as u64)
    }
}

struct MemoryWriter {
    path: PathBuf,
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.files
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory file system for testing.
#[derive(Clone, Default)]
pub struct MemoryFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    /// Remaining forced open failures per path.
    open_failures: Arc<Mutex<HashMap<PathBuf, usize>>>,
    /// Open attempts per path.
    open_log: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(path.into(), data.into());
    }

    /// Contents written so far (or inserted) at `path`.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    /// Fail the next `count` opens of `path` even if it exists.
    pub fn fail_opens(&self, path: impl Into<PathBuf>, count: usize) {
        self.open_failures
            .lock()
            .unwrap()
            .insert(path.into(), count);
    }

    pub fn open_attempts(&self, path: impl AsRef<Path>) -> usize {
        self.open_log
            .lock()
            .unwrap()
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &Path) -> io::Result<Box<dyn ImageFile>> {
        *self
            .open_log
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default() += 1;

        if let Some(left) = self.open_failures.lock().unwrap().get_mut(path) {
            if *left > 0 {
                *left -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "forced open failure"));
            }
        }

        let data = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))?;
        Ok(Box::new(MemoryImage {
            data: Cursor::new(data),
        }))
    }

    fn create(&self, path: &Path) -> io::Result<LogSink> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryWriter {
            path: path.to_path_buf(),
            files: self.files.clone(),
        }))
    }
}
