//! Result row buffering.
//!
//! Rows accumulate as opaque DataRow frames while the connection drains a
//! response train. A bounded number stay in memory; past the limit they
//! spill to a temp file and are reloaded a page at a time during
//! iteration. Rows come back out strictly in insertion order.
//!
//! A cache is driven by one producer, then one reader, never both at
//! once; the connection is responsible for that sequencing.
use std::io::{self, Read, Write};

use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::trace::verbose;

/// Row store picked by [`RowCache::new`] from the in-memory limit.
#[derive(Debug)]
pub enum RowCache {
    Memory(MemoryCache),
    File(FileCache),
}

impl RowCache {
    /// A `limit` of 0 means unlimited and stays fully in memory. A
    /// positive limit spills to a temp file once exceeded; if the temp
    /// file cannot be created the cache silently stays in memory.
    pub fn new(limit: usize) -> RowCache {
        if limit == 0 {
            return RowCache::Memory(MemoryCache::new());
        }
        match FileCache::new(limit) {
            Ok(cache) => RowCache::File(cache),
            Err(_err) => {
                verbose!("row spill file creation failed, staying in memory: {_err}");
                RowCache::Memory(MemoryCache::new())
            }
        }
    }

    /// Append a row frame. Only valid before [`finalize`][RowCache::finalize].
    pub fn add_row(&mut self, row: Bytes) {
        match self {
            RowCache::Memory(m) => m.add_row(row),
            RowCache::File(f) => f.add_row(row),
        }
    }

    /// Signal the end of new rows and switch the cache read-only.
    pub fn finalize(&mut self) -> io::Result<()> {
        match self {
            RowCache::Memory(m) => m.finalize(),
            RowCache::File(f) => f.finalize(),
        }
    }

    /// Pull the next row, or `None` when exhausted.
    pub fn get_row(&mut self) -> io::Result<Option<Bytes>> {
        match self {
            RowCache::Memory(m) => Ok(m.get_row()),
            RowCache::File(f) => f.get_row(),
        }
    }

    /// Look at the next row without advancing.
    pub fn peek(&mut self) -> io::Result<Option<Bytes>> {
        match self {
            RowCache::Memory(m) => Ok(m.peek()),
            RowCache::File(f) => f.peek(),
        }
    }

    /// Release resources; removes the spill file if one exists.
    pub fn close(self) -> io::Result<()> {
        match self {
            RowCache::Memory(_) => Ok(()),
            RowCache::File(f) => f.close(),
        }
    }
}

impl Default for RowCache {
    fn default() -> Self {
        RowCache::Memory(MemoryCache::new())
    }
}

/// Append-only vector with a read cursor.
#[derive(Debug, Default)]
pub struct MemoryCache {
    rows: Vec<Bytes>,
    read_idx: usize,
}

impl MemoryCache {
    fn new() -> Self {
        Self::default()
    }

    fn add_row(&mut self, row: Bytes) {
        self.rows.push(row);
    }

    fn finalize(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn get_row(&mut self) -> Option<Bytes> {
        let row = self.rows.get(self.read_idx)?.clone();
        self.read_idx += 1;
        Some(row)
    }

    fn peek(&self) -> Option<Bytes> {
        self.rows.get(self.read_idx).cloned()
    }
}

/// In-memory page of at most `limit` rows; overflow rows live in a temp
/// file as `[u32 little-endian length][frame bytes]` records.
///
/// The temp file is created with a random name in the system temp
/// directory with owner-only permissions, and removed on close (or drop).
#[derive(Debug)]
pub struct FileCache {
    page: Vec<Bytes>,
    read_idx: usize,
    limit: usize,
    temp: NamedTempFile,
    reader: Option<std::fs::File>,
    spilled: bool,
}

impl FileCache {
    fn new(limit: usize) -> io::Result<Self> {
        Ok(Self {
            page: Vec::with_capacity(limit),
            read_idx: 0,
            limit,
            temp: NamedTempFile::new()?,
            reader: None,
            spilled: false,
        })
    }

    fn add_row(&mut self, row: Bytes) {
        if self.page.len() < self.limit {
            self.page.push(row);
            return;
        }
        self.spilled = true;
        let file = self.temp.as_file_mut();
        let len = (row.len() as u32).to_le_bytes();
        // a failed spill write surfaces later as a short file on reload
        let _ = file.write_all(&len).and_then(|()| file.write_all(&row));
    }

    fn finalize(&mut self) -> io::Result<()> {
        self.temp.as_file_mut().flush()?;
        self.reader = Some(self.temp.reopen()?);
        Ok(())
    }

    fn get_row(&mut self) -> io::Result<Option<Bytes>> {
        if self.read_idx >= self.page.len() && !self.reload()? {
            return Ok(None);
        }
        let row = self.page[self.read_idx].clone();
        self.read_idx += 1;
        Ok(Some(row))
    }

    fn peek(&mut self) -> io::Result<Option<Bytes>> {
        if self.read_idx >= self.page.len() && !self.reload()? {
            return Ok(None);
        }
        Ok(self.page.get(self.read_idx).cloned())
    }

    /// Refill the page with up to `limit` records from the spill file.
    ///
    /// EOF on a record boundary ends iteration; EOF inside a record is a
    /// corrupt spill file and a hard error.
    fn reload(&mut self) -> io::Result<bool> {
        self.page.clear();
        self.read_idx = 0;

        if !self.spilled {
            return Ok(false);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };

        while self.page.len() < self.limit {
            let mut len_buf = [0u8; 4];
            match read_record_len(reader, &mut len_buf)? {
                Some(len) => {
                    let mut row = vec![0u8; len as usize];
                    reader.read_exact(&mut row).map_err(|_| {
                        io::Error::new(io::ErrorKind::UnexpectedEof, "row spill file truncated")
                    })?;
                    self.page.push(row.into());
                }
                None => break,
            }
        }

        Ok(!self.page.is_empty())
    }

    fn close(self) -> io::Result<()> {
        self.temp.close()
    }
}

/// Read the next length prefix, `None` on clean EOF.
fn read_record_len(reader: &mut impl Read, buf: &mut [u8; 4]) -> io::Result<Option<u32>> {
    let n = reader.read(&mut buf[..])?;
    if n == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut buf[n..])
        .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "row spill file truncated"))?;
    Ok(Some(u32::from_le_bytes(*buf)))
}
