//! Progress reporting for reading and importing a dump.
//!
//! [`ProgressReader`] counts bytes pulled from the (possibly compressed) dump
//! file; [`ImportProgress`] is the per-row callback the orchestrator drives.

use crate::schema::Collection;
use std::io::Read;

/// A reader wrapper that reports the running total of compressed bytes read.
pub struct ProgressReader<R: Read> {
    reader: R,
    callback: Box<dyn Fn(u64)>,
    bytes_read: u64,
}

impl<R: Read> ProgressReader<R> {
    pub fn new<F>(reader: R, callback: F) -> Self
    where
        F: Fn(u64) + 'static,
    {
        Self {
            reader,
            callback: Box::new(callback),
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n > 0 {
            self.bytes_read += n as u64;
            (self.callback)(self.bytes_read);
        }
        Ok(n)
    }
}

/// Row progress within one table: `(collection, rows done, rows in table)`
pub type ImportProgress = Box<dyn FnMut(Collection, u64, u64)>;
