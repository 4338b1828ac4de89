use memtable::ValueEntry;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::Result;
use crate::format::read_record;
use crate::SSTableReader;

/// Lazy ascending walk over the data region of one SSTable.
///
/// Holds its own file handle and an `Arc` on the table, so the file outlives
/// any compaction that retires it while the iterator is still in use.
/// Yields tombstones; callers decide what to do with them. After an error
/// the iterator is exhausted.
pub struct SSTableIterator {
    table: Arc<SSTableReader>,
    reader: BufReader<File>,
    pos: u64,
    end: u64,
    /// Records below this key are skipped (positioning inside a block).
    skip_below: Option<Vec<u8>>,
    done: bool,
}

impl SSTableIterator {
    pub(crate) fn new(table: Arc<SSTableReader>, start: Option<&[u8]>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(table.path())?);
        let end = table.data_end();

        let (pos, skip_below, done) = match start {
            Some(s) if s > table.max_key() => (end, None, true),
            Some(s) if s > table.min_key() => (table.seek_offset(s), Some(s.to_vec()), false),
            _ => (0, None, false),
        };
        reader.seek(SeekFrom::Start(pos))?;

        Ok(Self {
            table,
            reader,
            pos,
            end,
            skip_below,
            done,
        })
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<(Vec<u8>, ValueEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.pos < self.end {
            match read_record(&mut self.reader, self.table.path(), self.pos) {
                Ok((key, entry, len)) => {
                    self.pos += len;
                    if let Some(floor) = &self.skip_below {
                        if key.as_slice() < floor.as_slice() {
                            continue;
                        }
                        self.skip_below = None;
                    }
                    return Some(Ok((key, entry)));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.done = true;
        None
    }
}
