//! Byte-level file handles.
//!
//! Writers push finished byte ranges through [`WriteFile`]; readers pull
//! random-access ranges through [`ReadFile`]. [`LocalWriteFile`] and
//! [`LocalReadFile`] wrap the local filesystem, [`MemoryFile`] keeps
//! everything in a vector.

use crate::error::{Result, TsFileError};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-only output handle.
pub trait WriteFile {
    /// Appends `bytes`.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> Result<()>;

    /// Flushes, syncs, and releases the handle. Later writes fail.
    fn close(&mut self) -> Result<()>;
}

/// Random-access input handle.
pub trait ReadFile {
    /// Reads exactly `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if the range extends past the end of the file.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// File size in bytes.
    fn size(&self) -> u64;
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(TsFileError::OutOfRange { offset, size }),
    }
}

/// A new file on the local filesystem.
pub struct LocalWriteFile {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
}

impl LocalWriteFile {
    /// Creates `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the file exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    TsFileError::AlreadyExists(path.display().to_string())
                }
                _ => TsFileError::IoError(e),
            })?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        let path = &self.path;
        self.writer
            .as_mut()
            .ok_or_else(|| TsFileError::InvalidArg(format!("{} is closed", path.display())))
    }
}

impl WriteFile for LocalWriteFile {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer()?.write_all(bytes)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.sync()?;
        self.writer = None;
        Ok(())
    }
}

/// An existing file on the local filesystem.
pub struct LocalReadFile {
    file: File,
    size: u64,
}

impl LocalReadFile {
    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl ReadFile for LocalReadFile {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        check_range(offset, len, self.size)?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// In-memory file usable for both writing and reading.
#[derive(Debug, Default, Clone)]
pub struct MemoryFile {
    data: Vec<u8>,
    closed: bool,
    sync_count: usize,
}

impl MemoryFile {
    /// Creates an empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing bytes for reading.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            closed: true,
            sync_count: 0,
        }
    }

    /// File contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the file and returns its contents.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Returns true once [`close`](WriteFile::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of [`sync`](WriteFile::sync) calls, including the one made by
    /// `close`.
    pub fn sync_count(&self) -> usize {
        self.sync_count
    }
}

impl WriteFile for MemoryFile {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TsFileError::InvalidArg(
                "memory file is closed".to_string(),
            ));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.sync_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.sync()?;
            self.closed = true;
        }
        Ok(())
    }
}

impl ReadFile for MemoryFile {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data[start..start + len].to_vec())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_file_roundtrip() {
        let mut file = MemoryFile::new();
        file.write(b"TsFile").unwrap();
        file.write(&[4]).unwrap();
        file.close().unwrap();

        assert!(file.is_closed());
        assert_eq!(file.sync_count(), 1);
        assert!(file.write(b"x").is_err());
        assert_eq!(file.read_at(6, 1).unwrap(), vec![4]);
        assert!(matches!(
            file.read_at(6, 2),
            Err(TsFileError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_local_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.tsfile");

        let mut out = LocalWriteFile::create(&path).unwrap();
        out.write(b"hello ").unwrap();
        out.write(b"world").unwrap();
        out.close().unwrap();
        assert!(out.write(b"!").is_err());

        assert!(matches!(
            LocalWriteFile::create(&path),
            Err(TsFileError::AlreadyExists(_))
        ));

        let mut input = LocalReadFile::open(&path).unwrap();
        assert_eq!(input.size(), 11);
        assert_eq!(input.read_at(6, 5).unwrap(), b"world");
    }
}
