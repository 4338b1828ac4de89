//! # WAL: Write-Ahead Log
//!
//! Crash durability for the Strata storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the WAL **before** the corresponding memtable update. On
//! restart the WAL is replayed to reconstruct the memtable, so no
//! acknowledged write is lost.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body (Put): `[version=1: u8][seq: u64][op=0: u8][key_len: u32][key][val_len: u32][value]`
//! Body (Del): `[version=1: u8][seq: u64][op=1: u8][key_len: u32][key]`
//!
//! `record_len` includes the 4-byte CRC but **not** itself. The CRC covers
//! the body only.
//!
//! ## Torn tails vs corruption
//!
//! A crash can leave a partially written record at the end of a segment.
//! Replay treats the following as a torn tail and stops cleanly:
//!
//! - a record whose length runs past the end of the file,
//! - a CRC mismatch on the **last** record of the file,
//! - a zero-filled remainder (preallocated but unwritten blocks).
//!
//! A CRC mismatch followed by more data is disk corruption and is returned
//! as [`WalError::Corrupt`].
//!
//! ## Segments
//!
//! [`Wal`] manages a directory of numbered segments (`wal-000001.log`, ...),
//! rotating on demand and when a segment exceeds its size bound.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalWriter, WalReader, WalRecord};
//!
//! let mut w = WalWriter::create("wal.log", true).unwrap();
//! w.append(&WalRecord::Put {
//!     seq: 1,
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|rec| println!("{:?}", rec)).unwrap();
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

mod segment;

pub use segment::{segment_file_name, Wal};

/// Record body format version written by this crate.
pub const WAL_FORMAT_VERSION: u8 = 1;

/// Upper bound on a single framed record (`record_len`).
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// A delete with an empty key: version + seq + op + key_len.
const MIN_BODY_LEN: usize = 1 + 8 + 1 + 4;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;

/// A single WAL record representing either a key-value insertion or a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion.
    Put {
        /// Sequence number assigned by the engine.
        seq: u64,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// A key deletion (tombstone).
    Del {
        /// Sequence number assigned by the engine.
        seq: u64,
        key: Vec<u8>,
    },
}

impl WalRecord {
    pub fn seq(&self) -> u64 {
        match self {
            WalRecord::Put { seq, .. } | WalRecord::Del { seq, .. } => *seq,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Put { key, .. } | WalRecord::Del { key, .. } => key,
        }
    }

    /// Serializes the record body (everything covered by the CRC).
    fn encode_body(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u8(WAL_FORMAT_VERSION)?;
        match self {
            WalRecord::Put { seq, key, value } => {
                out.write_u64::<LittleEndian>(*seq)?;
                out.write_u8(OP_PUT)?;
                out.write_u32::<LittleEndian>(key.len() as u32)?;
                out.extend_from_slice(key);
                out.write_u32::<LittleEndian>(value.len() as u32)?;
                out.extend_from_slice(value);
            }
            WalRecord::Del { seq, key } => {
                out.write_u64::<LittleEndian>(*seq)?;
                out.write_u8(OP_DEL)?;
                out.write_u32::<LittleEndian>(key.len() as u32)?;
                out.extend_from_slice(key);
            }
        }
        Ok(())
    }

    /// Parses a CRC-verified body. `offset` is only used for error reporting.
    fn decode_body(body: &[u8], offset: u64) -> Result<WalRecord, WalError> {
        let corrupt = || WalError::Corrupt { offset };
        let mut br = body;

        let version = br.read_u8().map_err(|_| corrupt())?;
        if version != WAL_FORMAT_VERSION {
            return Err(WalError::UnsupportedVersion(version));
        }
        let seq = br.read_u64::<LittleEndian>().map_err(|_| corrupt())?;
        let op = br.read_u8().map_err(|_| corrupt())?;
        let key = read_chunk(&mut br).ok_or_else(corrupt)?;

        let record = match op {
            OP_PUT => {
                let value = read_chunk(&mut br).ok_or_else(corrupt)?;
                WalRecord::Put { seq, key, value }
            }
            OP_DEL => WalRecord::Del { seq, key },
            _ => return Err(corrupt()),
        };

        if !br.is_empty() {
            return Err(corrupt());
        }
        Ok(record)
    }
}

/// Reads a `[len: u32][bytes]` chunk, or `None` if it does not fit.
fn read_chunk(br: &mut &[u8]) -> Option<Vec<u8>> {
    let len = br.read_u32::<LittleEndian>().ok()? as usize;
    if len > br.len() {
        return None;
    }
    let (chunk, rest) = br.split_at(len);
    *br = rest;
    Some(chunk.to_vec())
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation in the middle of a segment, or had an
    /// invalid layout.
    #[error("corrupt wal record at offset {offset}")]
    Corrupt { offset: u64 },

    /// The record was written by an unknown format version.
    #[error("unsupported wal record version {0}")]
    UnsupportedVersion(u8),

    /// The encoded record exceeds [`MAX_RECORD_SIZE`].
    #[error("wal record too large: {0} bytes")]
    RecordTooLarge(usize),
}

/// What a replay observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records handed to the callback.
    pub records: u64,
    /// Bytes covered by those records.
    pub valid_bytes: u64,
    /// Whether replay stopped at a torn tail rather than a clean EOF.
    pub torn_tail: bool,
}

/// Append-only WAL writer.
///
/// Records are serialized into a scratch buffer, checksummed, and written
/// with a single `write_all`. When `sync` is `true`, every append is followed
/// by `sync_data()` so the record is on disk before the call returns.
///
/// A failed append truncates the file back to the end of the last good
/// record, so a partial frame never precedes later appends.
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Length of the file up to the last fully appended record.
    len: u64,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    ///
    /// * `path` - file system path for the WAL (created if it does not exist).
    /// * `sync` - if true, every `append` call is followed by `fsync`.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sync,
            len,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it to the WAL file.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        self.buf.clear();
        // frame header (record_len + crc), filled in below
        self.buf.extend_from_slice(&[0u8; 8]);
        record.encode_body(&mut self.buf)?;

        let body = &self.buf[8..];
        let record_len = body.len() + 4;
        if record_len > MAX_RECORD_SIZE {
            return Err(WalError::RecordTooLarge(record_len));
        }

        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        self.buf[0..4].copy_from_slice(&(record_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        if let Err(e) = self.write_frame() {
            self.rollback();
            return Err(e.into());
        }

        self.len += self.buf.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self) -> io::Result<()> {
        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            tracing::error!(error = %e, len = self.len, "failed to truncate wal after a failed append");
        }
    }

    /// Forces all written data to disk.
    ///
    /// Useful when `sync` is `false` (batched mode) and the caller wants
    /// durability at a specific point, e.g. before rotating.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Bytes written so far, including records from before this writer was
    /// opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Sequential WAL reader that yields valid records.
///
/// Generic over any `Read` implementor so it can be used with real files
/// (`WalReader<File>`) or in-memory buffers for testing.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every valid record in the WAL, calling `apply` for each one in
    /// write order.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** -> `Ok` with `torn_tail == false`.
    /// - **Torn tail** (see the crate docs) -> `Ok` with `torn_tail == true`
    ///   after yielding every complete record before it.
    /// - **CRC mismatch followed by more data** -> `Err(WalError::Corrupt)`.
    /// - **Unknown version** -> `Err(WalError::UnsupportedVersion)`.
    /// - **I/O error** -> `Err(WalError::Io(...))`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<ReplayStats, WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut stats = ReplayStats::default();
        let mut body = Vec::with_capacity(256);
        let mut header = [0u8; 8];

        loop {
            let offset = stats.valid_bytes;

            let got = read_full(&mut self.rdr, &mut header)?;
            if got == 0 {
                return Ok(stats);
            }
            if got < header.len() {
                stats.torn_tail = true;
                return Ok(stats);
            }

            let record_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            let framed = record_len as usize;
            if framed < 4 + MIN_BODY_LEN || framed > MAX_RECORD_SIZE {
                if header.iter().all(|&b| b == 0) && self.rest_is_zero()? {
                    stats.torn_tail = true;
                    return Ok(stats);
                }
                return Err(WalError::Corrupt { offset });
            }

            let body_len = (record_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            if read_full(&mut self.rdr, &mut body)? < body_len {
                stats.torn_tail = true;
                return Ok(stats);
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                if self.at_eof()? {
                    stats.torn_tail = true;
                    return Ok(stats);
                }
                return Err(WalError::Corrupt { offset });
            }

            let record = WalRecord::decode_body(&body, offset)?;
            apply(record);
            stats.records += 1;
            stats.valid_bytes += 4 + record_len as u64;
        }
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        Ok(self.rdr.fill_buf()?.is_empty())
    }

    fn rest_is_zero(&mut self) -> io::Result<bool> {
        loop {
            let chunk = self.rdr.fill_buf()?;
            if chunk.is_empty() {
                return Ok(true);
            }
            if chunk.iter().any(|&b| b != 0) {
                return Ok(false);
            }
            let n = chunk.len();
            self.rdr.consume(n);
        }
    }
}

/// Like `read_exact`, but reports how many bytes were read before EOF
/// instead of failing.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
