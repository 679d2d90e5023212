//! Paged file (C3): read/write fixed-size blocks at RBN offsets behind a
//! header region. No buffering layer beyond what the OS provides — every
//! read and write goes straight to the file handle, and each block read
//! goes to the medium rather than through an in-process cache.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use snafu::ResultExt;

use crate::error::{Error, IoSnafu, ShortReadSnafu};

/// A file addressed as a header region followed by contiguous fixed-size
/// blocks/pages at 1-based RBN offsets. RBN 0 is the null pointer and is
/// never read or written through this type.
#[derive(Debug)]
pub struct PagedFile {
    file: File,
    header_size: u64,
    block_size: usize,
}

impl PagedFile {
    /// Opens an existing file in read/write mode.
    pub fn open(path: impl AsRef<Path>, header_size: u64, block_size: usize) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .context(IoSnafu { operation: "open" })?;
        Ok(Self {
            file,
            header_size,
            block_size,
        })
    }

    /// Creates a new file (truncating any existing content).
    pub fn create(path: impl AsRef<Path>, header_size: u64, block_size: usize) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .context(IoSnafu { operation: "create" })?;
        Ok(Self {
            file,
            header_size,
            block_size,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    fn offset_for(&self, rbn: u32) -> u64 {
        self.header_size + u64::from(rbn) * self.block_size as u64
    }

    /// Reads the `block_size` bytes at `rbn` (1-based; `rbn` must be nonzero).
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn read_block(&mut self, rbn: u32) -> Result<Vec<u8>, Error> {
        debug_assert_ne!(rbn, 0, "RBN 0 is the null pointer and must never be read");
        let offset = self.offset_for(rbn);
        self.file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu { operation: "seek" })?;
        let mut buf = vec![0u8; self.block_size];
        let read = self
            .file
            .read(&mut buf)
            .context(IoSnafu { operation: "read" })?;
        if read != self.block_size {
            return ShortReadSnafu {
                rbn,
                expected: self.block_size,
                actual: read,
            }
            .fail();
        }
        Ok(buf)
    }

    /// Writes exactly `block_size` bytes at `rbn`, flushing before returning.
    #[tracing::instrument(level = "trace", skip(self, bytes))]
    pub fn write_block(&mut self, rbn: u32, bytes: &[u8]) -> Result<(), Error> {
        debug_assert_ne!(rbn, 0, "RBN 0 is the null pointer and must never be written");
        debug_assert_eq!(bytes.len(), self.block_size);
        let offset = self.offset_for(rbn);
        self.file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu { operation: "seek" })?;
        self.file
            .write_all(bytes)
            .context(IoSnafu { operation: "write" })?;
        self.file.flush().context(IoSnafu { operation: "flush" })?;
        Ok(())
    }

    /// Reads `len` raw bytes at an absolute byte offset (used for header I/O).
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        self.file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu { operation: "seek" })?;
        let mut buf = vec![0u8; len];
        let read = self
            .file
            .read(&mut buf)
            .context(IoSnafu { operation: "read" })?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Writes raw bytes at an absolute byte offset (used for header I/O).
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Error> {
        self.file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu { operation: "seek" })?;
        self.file
            .write_all(bytes)
            .context(IoSnafu { operation: "write" })?;
        self.file.flush().context(IoSnafu { operation: "flush" })?;
        Ok(())
    }

    pub fn set_header_size(&mut self, header_size: u64) {
        self.header_size = header_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_then_reads_back_same_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.zcb");
        let mut pf = PagedFile::create(&path, 16, 64).unwrap();
        let data = vec![42u8; 64];
        pf.write_block(1, &data).unwrap();
        let back = pf.read_block(1).unwrap();
        assert_eq!(data, back);
    }

    #[test]
    fn distinct_rbns_do_not_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.zcb");
        let mut pf = PagedFile::create(&path, 16, 64).unwrap();
        pf.write_block(1, &vec![1u8; 64]).unwrap();
        pf.write_block(2, &vec![2u8; 64]).unwrap();
        assert_eq!(pf.read_block(1).unwrap(), vec![1u8; 64]);
        assert_eq!(pf.read_block(2).unwrap(), vec![2u8; 64]);
    }

    #[test]
    fn short_read_past_end_of_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.zcb");
        let pf = PagedFile::create(&path, 16, 64).unwrap();
        let mut pf = pf;
        assert!(pf.read_block(5).is_err());
    }
}
