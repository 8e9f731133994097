//! In-memory storage implementation.
//!
//! Backs a database with a plain byte vector. Primarily used by tests, but
//! also handy for callers that keep databases out of the filesystem
//! entirely.

#![allow(clippy::missing_panics_doc)]

use std::io::{self, Read, Write};
use std::sync::{Mutex, RwLock};

use crate::error::{PwsError, PwsResult};

use super::{PwsStorage, ReadStream, WriteStream};

/// In-memory storage backed by a `Vec<u8>`.
///
/// A monotonically increasing revision counter stands in for the
/// modification timestamp of file-backed storages.
pub struct MemoryStorage {
    data: RwLock<Vec<u8>>,
    revision: Mutex<u64>,
    writable: bool,
}

impl MemoryStorage {
    /// Creates a new empty, writable storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Vec::new()),
            revision: Mutex::new(0),
            writable: true,
        }
    }

    /// Creates a storage with initial content.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            revision: Mutex::new(0),
            writable: true,
        }
    }

    /// Sets whether the storage accepts writes.
    #[must_use]
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Returns a copy of the current content.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().unwrap().clone()
    }

    /// Simulates an external writer touching the storage.
    pub fn touch(&self) {
        *self.revision.lock().unwrap() += 1;
    }

    fn commit(&self, data: Vec<u8>) {
        *self.data.write().unwrap() = data;
        *self.revision.lock().unwrap() += 1;
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryReader {
    cursor: io::Cursor<Vec<u8>>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl ReadStream for MemoryReader {}

struct MemoryWriter<'a> {
    storage: &'a MemoryStorage,
    buf: Vec<u8>,
}

impl Write for MemoryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteStream for MemoryWriter<'_> {
    fn close(self: Box<Self>) -> PwsResult<()> {
        self.storage.commit(self.buf);
        Ok(())
    }
}

impl PwsStorage for MemoryStorage {
    fn open_for_read(&self) -> PwsResult<Box<dyn ReadStream + '_>> {
        let snapshot = self.data.read().unwrap().clone();
        Ok(Box::new(MemoryReader {
            cursor: io::Cursor::new(snapshot),
        }))
    }

    fn open_for_write(&self) -> PwsResult<Box<dyn WriteStream + '_>> {
        if !self.writable {
            return Err(PwsError::ReadOnly);
        }
        Ok(Box::new(MemoryWriter {
            storage: self,
            buf: Vec::new(),
        }))
    }

    fn last_modified(&self) -> PwsResult<u64> {
        Ok(*self.revision.lock().unwrap())
    }

    fn exists(&self) -> bool {
        !self.data.read().unwrap().is_empty()
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}
