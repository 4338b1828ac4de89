use bloom::BloomFilter;
use memtable::ValueEntry;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SSTableError};
use crate::format::{decode_index, read_record, Footer, IndexEntry, TableMeta, FOOTER_BYTES};
use crate::iterator::SSTableIterator;

/// Handle on one immutable SSTable file.
///
/// [`open`](SSTableReader::open) validates the footer and loads the sparse
/// index, the bloom filter and the meta block into memory. The data region
/// stays on disk: a point lookup reads a single index block.
///
/// Readers are shared as `Arc<SSTableReader>`. After compaction retires a
/// table it is [marked obsolete](SSTableReader::mark_obsolete); the file is
/// deleted when the last handle (including open iterators) is dropped.
pub struct SSTableReader {
    path: PathBuf,
    file_id: u64,
    file_size: u64,
    footer: Footer,
    meta: TableMeta,
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    /// Persistent handle for point lookups.
    file: Mutex<BufReader<File>>,
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Opens and validates an SSTable.
    ///
    /// # Validation
    ///
    /// - the file holds at least a footer, and the footer's magic, version
    ///   and checksum are correct;
    /// - the index, bloom and meta sections are contiguous and end exactly
    ///   at the footer;
    /// - the sparse index is strictly increasing in both key and offset;
    /// - the meta key range agrees with the index.
    ///
    /// Any violation is [`SSTableError::Corrupt`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let corrupt = |reason: String| SSTableError::Corrupt {
            path: path.clone(),
            reason,
        };

        let mut f = File::open(&path)?;
        let file_size = f.metadata()?.len();
        if file_size < FOOTER_BYTES {
            return Err(corrupt(format!("file too small for footer ({} bytes)", file_size)));
        }

        let footer_start = file_size - FOOTER_BYTES;
        f.seek(SeekFrom::Start(footer_start))?;
        let mut footer_buf = vec![0u8; FOOTER_BYTES as usize];
        f.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf).map_err(&corrupt)?;

        check_layout(&footer, footer_start).map_err(&corrupt)?;

        let index_buf = read_section(&mut f, footer.index_offset, footer.index_len)?;
        let index = decode_index(&index_buf).map_err(&corrupt)?;
        check_index(&index, &footer).map_err(&corrupt)?;

        let bloom_buf = read_section(&mut f, footer.bloom_offset, footer.bloom_len)?;
        let bloom = BloomFilter::from_bytes(&bloom_buf)
            .map_err(|e| corrupt(format!("bad bloom filter: {}", e)))?;

        let meta_buf = read_section(&mut f, footer.meta_offset, footer.meta_len)?;
        let meta = TableMeta::decode(&meta_buf).map_err(&corrupt)?;
        if meta.min_key != index[0].key || meta.max_key < meta.min_key {
            return Err(corrupt("meta key range disagrees with index".to_string()));
        }

        f.seek(SeekFrom::Start(0))?;
        let file_id = file_id_from_path(&path);

        Ok(Self {
            path,
            file_id,
            file_size,
            footer,
            meta,
            index,
            bloom,
            file: Mutex::new(BufReader::new(f)),
            obsolete: AtomicBool::new(false),
        })
    }

    /// Point lookup.
    ///
    /// Returns `Ok(Some(entry))` if the key is in this table (possibly a
    /// tombstone with `value: None`) and `Ok(None)` otherwise. A bloom
    /// negative or a key outside `[min_key, max_key]` answers without I/O.
    ///
    /// # Errors
    ///
    /// I/O failure, or [`SSTableError::Corrupt`] if a record in the scanned
    /// block fails its checksum.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }
        if key < self.meta.min_key.as_slice() || key > self.meta.max_key.as_slice() {
            return Ok(None);
        }

        let (start, end) = match self.block_for(key) {
            Some(range) => range,
            None => return Ok(None),
        };

        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(start))?;
        let mut pos = start;
        while pos < end {
            let (found, entry, len) = read_record(&mut *f, &self.path, pos)?;
            match found.as_slice().cmp(key) {
                std::cmp::Ordering::Less => pos += len,
                std::cmp::Ordering::Equal => return Ok(Some(entry)),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Byte range `[start, end)` of the index block that could hold `key`:
    /// the last sampled key `<= key` up to the next sampled key.
    fn block_for(&self, key: &[u8]) -> Option<(u64, u64)> {
        let next = self.index.partition_point(|e| e.key.as_slice() <= key);
        if next == 0 {
            return None;
        }
        let start = self.index[next - 1].offset;
        let end = self
            .index
            .get(next)
            .map_or(self.footer.index_offset, |e| e.offset);
        Some((start, end))
    }

    /// Offset of the block where a scan starting at `start` should begin.
    pub(crate) fn seek_offset(&self, start: &[u8]) -> u64 {
        let next = self.index.partition_point(|e| e.key.as_slice() <= start);
        if next == 0 {
            0
        } else {
            self.index[next - 1].offset
        }
    }

    /// Ascending iterator over every entry, tombstones included.
    pub fn iter(self: &Arc<Self>) -> Result<SSTableIterator> {
        SSTableIterator::new(Arc::clone(self), None)
    }

    /// Ascending iterator starting at the first key `>= start`.
    pub fn iter_from(self: &Arc<Self>, start: &[u8]) -> Result<SSTableIterator> {
        SSTableIterator::new(Arc::clone(self), Some(start))
    }

    /// Flags the table for deletion once the last handle is dropped.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Numeric id parsed from the file name (`00000000000000000042.sst` -> 42),
    /// or 0 if the name is not numeric.
    #[must_use]
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of records in the table, tombstones included.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.footer.entry_count
    }

    #[must_use]
    pub fn tombstone_count(&self) -> u64 {
        self.meta.tombstones
    }

    #[must_use]
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    #[must_use]
    pub fn min_key(&self) -> &[u8] {
        &self.meta.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> &[u8] {
        &self.meta.max_key
    }

    /// End of the data region.
    pub(crate) fn data_end(&self) -> u64 {
        self.footer.index_offset
    }

    /// Number of sampled keys in the sparse index.
    #[must_use]
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Whether some key in `[min_key, max_key]` could start with `prefix`.
    /// Keys with a prefix form one contiguous run starting at the prefix
    /// itself.
    #[must_use]
    pub fn may_hold_prefix(&self, prefix: &[u8]) -> bool {
        let min = self.meta.min_key.as_slice();
        self.meta.max_key.as_slice() >= prefix && (min <= prefix || min.starts_with(prefix))
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed obsolete sstable"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove obsolete sstable"
            ),
        }
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("entries", &self.footer.entry_count)
            .field("bytes", &self.file_size)
            .field("max_seq", &self.footer.max_seq)
            .finish()
    }
}

fn read_section(f: &mut File, offset: u64, len: u64) -> Result<Vec<u8>> {
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    f.read_exact(&mut buf)?;
    Ok(buf)
}

fn check_layout(footer: &Footer, footer_start: u64) -> std::result::Result<(), String> {
    let end_of = |off: u64, len: u64, what: &str| {
        off.checked_add(len)
            .ok_or_else(|| format!("{} section overflows", what))
    };
    if end_of(footer.index_offset, footer.index_len, "index")? != footer.bloom_offset
        || end_of(footer.bloom_offset, footer.bloom_len, "bloom")? != footer.meta_offset
        || end_of(footer.meta_offset, footer.meta_len, "meta")? != footer_start
    {
        return Err("section offsets do not tile the file".to_string());
    }
    if footer.entry_count == 0 {
        return Err("table has no entries".to_string());
    }
    Ok(())
}

fn check_index(index: &[IndexEntry], footer: &Footer) -> std::result::Result<(), String> {
    let first = index.first().ok_or("sparse index is empty")?;
    if first.offset != 0 {
        return Err(format!("first index entry points at {} instead of 0", first.offset));
    }
    for pair in index.windows(2) {
        if pair[0].key >= pair[1].key || pair[0].offset >= pair[1].offset {
            return Err("sparse index is not strictly increasing".to_string());
        }
    }
    if index.iter().any(|e| e.offset >= footer.index_offset) {
        return Err("index entry points past the data region".to_string());
    }
    Ok(())
}

fn file_id_from_path(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
