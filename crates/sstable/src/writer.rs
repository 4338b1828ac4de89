use bloom::BloomFilter;
use memtable::{Memtable, ValueEntry};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SSTableError};
use crate::format::{encode_index, encode_record, Footer, IndexEntry, TableMeta};

/// Tunables shared by every table a writer produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SSTableOptions {
    /// One sparse index entry every `index_interval` records.
    pub index_interval: usize,
    /// Target false positive rate of the per-table bloom filter.
    pub bloom_false_positive_rate: f64,
}

impl Default for SSTableOptions {
    fn default() -> Self {
        Self {
            index_interval: 100,
            bloom_false_positive_rate: 0.01,
        }
    }
}

/// Summary of a table produced by [`SSTableBuilder::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub entry_count: u64,
    pub max_seq: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

/// Streams sorted entries into a new SSTable.
///
/// Records go to `<path>.sst.tmp`; [`finish`](SSTableBuilder::finish) appends
/// the index, bloom filter, meta block and footer, fsyncs, and renames the
/// file into place. A builder dropped before `finish` removes its temp file,
/// so an aborted flush or compaction never leaves a visible table behind.
pub struct SSTableBuilder {
    path: PathBuf,
    tmp_path: PathBuf,
    file: Option<BufWriter<File>>,
    options: SSTableOptions,
    /// Bytes of data records written so far.
    offset: u64,
    bloom: BloomFilter,
    index: Vec<IndexEntry>,
    entries: u64,
    max_seq: u64,
    tombstones: u64,
    first_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    scratch: Vec<u8>,
    published: bool,
}

impl SSTableBuilder {
    /// Creates the temp file for a table that will be renamed to `path`.
    ///
    /// `expected_entries` sizes the bloom filter; over-estimating is safe,
    /// under-estimating raises the false positive rate.
    pub fn create(path: &Path, expected_entries: usize, options: SSTableOptions) -> Result<Self> {
        let tmp_path = path.with_extension("sst.tmp");
        let raw = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            file: Some(BufWriter::new(raw)),
            options,
            offset: 0,
            bloom: BloomFilter::new(expected_entries.max(1), options.bloom_false_positive_rate),
            index: Vec::new(),
            entries: 0,
            max_seq: 0,
            tombstones: 0,
            first_key: None,
            last_key: None,
            scratch: Vec::with_capacity(256),
            published: false,
        })
    }

    /// Appends one entry. Keys must be strictly ascending.
    pub fn add(&mut self, key: &[u8], entry: &ValueEntry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(SSTableError::KeyOrder);
            }
        }
        let file = match self.file.as_mut() {
            Some(f) => f,
            None => return Err(SSTableError::Empty),
        };

        if self.entries % self.options.index_interval.max(1) as u64 == 0 {
            self.index.push(IndexEntry {
                key: key.to_vec(),
                offset: self.offset,
            });
        }

        self.offset += encode_record(key, entry, &mut self.scratch, file)?;
        self.bloom.insert(key);
        self.entries += 1;
        self.max_seq = self.max_seq.max(entry.seq);
        if entry.value.is_none() {
            self.tombstones += 1;
        }
        if self.first_key.is_none() {
            self.first_key = Some(key.to_vec());
        }
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Bytes of data written so far; used to split compaction output.
    pub fn data_size(&self) -> u64 {
        self.offset
    }

    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the trailing sections and atomically publishes the table.
    ///
    /// Fails with [`SSTableError::Empty`] if nothing was added; the temp file
    /// is removed in that case.
    pub fn finish(mut self) -> Result<TableInfo> {
        if self.entries == 0 {
            return Err(SSTableError::Empty);
        }
        let mut file = match self.file.take() {
            Some(f) => f,
            None => return Err(SSTableError::Empty),
        };

        let meta = TableMeta {
            min_key: self.first_key.take().unwrap_or_default(),
            max_key: self.last_key.take().unwrap_or_default(),
            tombstones: self.tombstones,
        };

        let mut section = Vec::new();

        let index_offset = self.offset;
        encode_index(&self.index, &mut section)?;
        let index_len = section.len() as u64;
        file.write_all(&section)?;

        let bloom_offset = index_offset + index_len;
        section.clear();
        self.bloom.write_to(&mut section)?;
        let bloom_len = section.len() as u64;
        file.write_all(&section)?;

        let meta_offset = bloom_offset + bloom_len;
        section.clear();
        meta.encode(&mut section)?;
        let meta_len = section.len() as u64;
        file.write_all(&section)?;

        let footer = Footer {
            index_offset,
            index_len,
            bloom_offset,
            bloom_len,
            meta_offset,
            meta_len,
            entry_count: self.entries,
            max_seq: self.max_seq,
        };
        footer.write_to(&mut file)?;

        file.flush()?;
        let raw = file.into_inner().map_err(|e| e.into_error())?;
        raw.sync_all()?;
        let file_size = raw.metadata()?.len();
        drop(raw);

        fs::rename(&self.tmp_path, &self.path)?;
        self.published = true;
        sync_parent_dir(&self.path);

        tracing::debug!(
            path = %self.path.display(),
            entries = self.entries,
            bytes = file_size,
            "sstable written"
        );

        Ok(TableInfo {
            path: self.path.clone(),
            file_size,
            entry_count: self.entries,
            max_seq: self.max_seq,
            min_key: meta.min_key,
            max_key: meta.max_key,
        })
    }
}

impl Drop for SSTableBuilder {
    fn drop(&mut self) {
        if !self.published {
            self.file.take();
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Writes whole tables in one call.
///
/// The writer is stateless; both entry points drive an [`SSTableBuilder`].
/// Writes are crash-safe: data goes to a temp file that is fsynced and then
/// renamed into place.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes `mem` (tombstones included) to a new SSTable at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SSTableError::Empty`] for an empty memtable (likely a logic
    /// bug in the caller) or any I/O failure.
    pub fn write_from_memtable(path: &Path, mem: &Memtable, options: SSTableOptions) -> Result<TableInfo> {
        if mem.is_empty() {
            return Err(SSTableError::Empty);
        }
        let mut builder = SSTableBuilder::create(path, mem.len(), options)?;
        for (key, entry) in mem.iter() {
            builder.add(key, entry)?;
        }
        builder.finish()
    }

    /// Writes an SSTable from `(key, ValueEntry)` pairs in ascending key
    /// order. The caller is responsible for deduplication.
    pub fn write_from_iterator<I>(
        path: &Path,
        expected_count: usize,
        iter: I,
        options: SSTableOptions,
    ) -> Result<TableInfo>
    where
        I: IntoIterator<Item = (Vec<u8>, ValueEntry)>,
    {
        let mut builder = SSTableBuilder::create(path, expected_count, options)?;
        for (key, entry) in iter {
            builder.add(&key, &entry)?;
        }
        builder.finish()
    }
}

/// Makes a rename durable on filesystems that journal directory entries
/// separately (ext4, XFS). Best effort.
pub(crate) fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}
