//! SSTable binary format: data records, sparse index, meta block and footer.
//!
//! ## Footer (76 bytes, always last)
//!
//! ```text
//! [index_offset: u64][index_len: u64]
//! [bloom_offset: u64][bloom_len: u64]
//! [meta_offset:  u64][meta_len:  u64]
//! [entry_count:  u64][max_seq:   u64]
//! [version: u32][crc32: u32][magic: u32 = "STRA"]
//! ```
//!
//! The CRC covers the eight offset/count fields and the version. The reader
//! checks the magic first, then the version, then the CRC, so an unknown
//! future version is reported as such instead of as a checksum failure.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::ValueEntry;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{Result, SSTableError};

/// Magic number identifying Strata SSTables (ASCII "STRA" on disk).
pub const SSTABLE_MAGIC: u32 = u32::from_le_bytes(*b"STRA");

/// Format version written by this crate.
pub const SSTABLE_FORMAT_VERSION: u32 = 1;

/// Size of the footer in bytes: 8 x u64 + version + crc + magic.
pub const FOOTER_BYTES: u64 = 8 * 8 + 4 + 4 + 4;

/// Largest key accepted when decoding. Prevents huge allocations on corrupt
/// files.
pub const MAX_KEY_BYTES: usize = 64 * 1024;

/// Largest value accepted when decoding.
pub const MAX_VALUE_BYTES: usize = 32 * 1024 * 1024;

const PRESENT: u8 = 1;
const TOMBSTONE: u8 = 0;

/// Offsets and counters stored in the fixed-size footer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_len: u64,
    pub bloom_offset: u64,
    pub bloom_len: u64,
    pub meta_offset: u64,
    pub meta_len: u64,
    pub entry_count: u64,
    pub max_seq: u64,
}

impl Footer {
    fn fields(&self) -> [u64; 8] {
        [
            self.index_offset,
            self.index_len,
            self.bloom_offset,
            self.bloom_len,
            self.meta_offset,
            self.meta_len,
            self.entry_count,
            self.max_seq,
        ]
    }

    /// Serializes the footer (exactly [`FOOTER_BYTES`] bytes).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut body = Vec::with_capacity(FOOTER_BYTES as usize);
        for field in self.fields() {
            body.write_u64::<LittleEndian>(field)?;
        }
        body.write_u32::<LittleEndian>(SSTABLE_FORMAT_VERSION)?;

        let mut hasher = Crc32::new();
        hasher.update(&body);
        body.write_u32::<LittleEndian>(hasher.finalize())?;
        body.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;

        w.write_all(&body)
    }

    /// Parses a footer, returning a human-readable reason on failure.
    pub fn decode(buf: &[u8]) -> std::result::Result<Footer, String> {
        if buf.len() != FOOTER_BYTES as usize {
            return Err(format!("footer must be {} bytes, got {}", FOOTER_BYTES, buf.len()));
        }

        let magic_at = buf.len() - 4;
        let magic = u32::from_le_bytes([buf[magic_at], buf[magic_at + 1], buf[magic_at + 2], buf[magic_at + 3]]);
        if magic != SSTABLE_MAGIC {
            return Err(format!("bad magic {:#010x}", magic));
        }

        let mut r = buf;
        let mut fields = [0u64; 8];
        for field in fields.iter_mut() {
            *field = r.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
        }
        let version = r.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        if version != SSTABLE_FORMAT_VERSION {
            return Err(format!("unsupported format version {}", version));
        }
        let stored_crc = r.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;

        let mut hasher = Crc32::new();
        hasher.update(&buf[..8 * 8 + 4]);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(format!(
                "footer checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            ));
        }

        let [index_offset, index_len, bloom_offset, bloom_len, meta_offset, meta_len, entry_count, max_seq] =
            fields;
        Ok(Footer {
            index_offset,
            index_len,
            bloom_offset,
            bloom_len,
            meta_offset,
            meta_len,
            entry_count,
            max_seq,
        })
    }
}

/// One sampled key of the sparse index and the offset of its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
}

/// `[count: u32]([key_len: u32][key][offset: u64])*`
pub fn encode_index(entries: &[IndexEntry], out: &mut Vec<u8>) -> io::Result<()> {
    out.write_u32::<LittleEndian>(entries.len() as u32)?;
    for e in entries {
        out.write_u32::<LittleEndian>(e.key.len() as u32)?;
        out.extend_from_slice(&e.key);
        out.write_u64::<LittleEndian>(e.offset)?;
    }
    Ok(())
}

pub fn decode_index(mut buf: &[u8]) -> std::result::Result<Vec<IndexEntry>, String> {
    let count = buf.read_u32::<LittleEndian>().map_err(|_| "index truncated".to_string())? as usize;
    // every entry takes at least 12 bytes
    if count > buf.len() / 12 {
        return Err(format!("index claims {} entries in {} bytes", count, buf.len()));
    }
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let key = read_sized(&mut buf, MAX_KEY_BYTES).ok_or("index key truncated")?;
        let offset = buf
            .read_u64::<LittleEndian>()
            .map_err(|_| "index offset truncated".to_string())?;
        entries.push(IndexEntry { key, offset });
    }
    if !buf.is_empty() {
        return Err(format!("{} trailing bytes after index", buf.len()));
    }
    Ok(entries)
}

/// Key range and tombstone count of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMeta {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub tombstones: u64,
}

impl TableMeta {
    /// `[min_key_len: u32][min_key][max_key_len: u32][max_key][tombstones: u64]`
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<LittleEndian>(self.min_key.len() as u32)?;
        out.extend_from_slice(&self.min_key);
        out.write_u32::<LittleEndian>(self.max_key.len() as u32)?;
        out.extend_from_slice(&self.max_key);
        out.write_u64::<LittleEndian>(self.tombstones)?;
        Ok(())
    }

    pub fn decode(mut buf: &[u8]) -> std::result::Result<TableMeta, String> {
        let min_key = read_sized(&mut buf, MAX_KEY_BYTES).ok_or("meta min_key truncated")?;
        let max_key = read_sized(&mut buf, MAX_KEY_BYTES).ok_or("meta max_key truncated")?;
        let tombstones = buf
            .read_u64::<LittleEndian>()
            .map_err(|_| "meta tombstone count truncated".to_string())?;
        if !buf.is_empty() {
            return Err("trailing bytes after meta block".to_string());
        }
        Ok(TableMeta {
            min_key,
            max_key,
            tombstones,
        })
    }
}

fn read_sized(buf: &mut &[u8], max: usize) -> Option<Vec<u8>> {
    let len = buf.read_u32::<LittleEndian>().ok()? as usize;
    if len > max || len > buf.len() {
        return None;
    }
    let (head, rest) = buf.split_at(len);
    *buf = rest;
    Some(head.to_vec())
}

/// Appends one data record: `[crc32][key_len][key][seq][present][val_len][val]`.
///
/// The CRC covers everything after itself. `val_len`/`val` are written only
/// when the entry holds a value. Returns the encoded length.
pub fn encode_record(key: &[u8], entry: &ValueEntry, scratch: &mut Vec<u8>, out: &mut impl Write) -> io::Result<u64> {
    scratch.clear();
    scratch.write_u32::<LittleEndian>(key.len() as u32)?;
    scratch.extend_from_slice(key);
    scratch.write_u64::<LittleEndian>(entry.seq)?;
    match &entry.value {
        Some(v) => {
            scratch.write_u8(PRESENT)?;
            scratch.write_u32::<LittleEndian>(v.len() as u32)?;
            scratch.extend_from_slice(v);
        }
        None => scratch.write_u8(TOMBSTONE)?,
    }

    let mut hasher = Crc32::new();
    hasher.update(scratch);
    out.write_u32::<LittleEndian>(hasher.finalize())?;
    out.write_all(scratch)?;
    Ok(4 + scratch.len() as u64)
}

/// Reads one data record written by [`encode_record`], verifying its CRC.
///
/// Returns the key, the entry and the number of bytes consumed. A truncated
/// record or checksum mismatch is reported as [`SSTableError::Corrupt`].
pub fn read_record<R: Read>(r: &mut R, path: &Path, offset: u64) -> Result<(Vec<u8>, ValueEntry, u64)> {
    let corrupt = |reason: String| SSTableError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("record at offset {}: {}", offset, reason),
    };
    let eof = |e: io::Error| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            corrupt("truncated".to_string())
        } else {
            SSTableError::Io(e)
        }
    };

    let stored_crc = r.read_u32::<LittleEndian>().map_err(eof)?;
    let key_len = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
    if key_len > MAX_KEY_BYTES {
        return Err(corrupt(format!("key_len {} exceeds maximum {}", key_len, MAX_KEY_BYTES)));
    }
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key).map_err(eof)?;
    let seq = r.read_u64::<LittleEndian>().map_err(eof)?;
    let present = r.read_u8().map_err(eof)?;

    let mut hasher = Crc32::new();
    hasher.update(&(key_len as u32).to_le_bytes());
    hasher.update(&key);
    hasher.update(&seq.to_le_bytes());
    hasher.update(&[present]);

    let mut consumed = 4 + 4 + key_len as u64 + 8 + 1;
    let value = match present {
        PRESENT => {
            let val_len = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
            if val_len > MAX_VALUE_BYTES {
                return Err(corrupt(format!("val_len {} exceeds maximum {}", val_len, MAX_VALUE_BYTES)));
            }
            let mut val = vec![0u8; val_len];
            r.read_exact(&mut val).map_err(eof)?;
            hasher.update(&(val_len as u32).to_le_bytes());
            hasher.update(&val);
            consumed += 4 + val_len as u64;
            Some(val)
        }
        TOMBSTONE => None,
        other => return Err(corrupt(format!("invalid presence flag {}", other))),
    };

    let actual_crc = hasher.finalize();
    if actual_crc != stored_crc {
        return Err(corrupt(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x}",
            stored_crc, actual_crc
        )));
    }

    Ok((key, ValueEntry { seq, value }, consumed))
}
