//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the Strata storage engine.
//!
//! When a memtable exceeds its size threshold the engine flushes it to disk
//! as an SSTable. SSTables are *write-once, read-many*: once created they are
//! never modified, only replaced during compaction.
//!
//! ## File layout (format version 1)
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted key/value records, unique keys)           │
//! │                                                               │
//! │ crc32 (u32) | key_len (u32) | key | seq (u64)                 │
//! │ present (u8) | [val_len (u32) | val]                           │
//! │                                                               │
//! │ The CRC32 covers everything after itself in the record.       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SPARSE INDEX (one entry per `index_interval` records)          │
//! │                                                               │
//! │ count (u32) | { key_len (u32) | key | data_offset (u64) }*     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM SECTION (serialized BloomFilter over every key)          │
//! │                                                               │
//! │ num_bits (u64) | num_hashes (u32) | items (u64)                │
//! │ bits_len (u32) | bits                                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │ META SECTION                                                   │
//! │                                                               │
//! │ min_key_len (u32) | min_key | max_key_len (u32) | max_key      │
//! │ tombstones (u64)                                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 76 bytes)                                  │
//! │                                                               │
//! │ index_off | index_len | bloom_off | bloom_len                  │
//! │ meta_off | meta_len | entry_count | max_seq      (u64 each)    │
//! │ version (u32) | crc32 (u32) | magic (u32) "STRA"               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.
//!
//! ## Point lookups
//!
//! bloom filter -> key range -> binary search of the sparse index -> linear
//! scan of one block (at most `index_interval` records).

mod error;
mod format;
mod iterator;
mod merge;
mod reader;
mod writer;

pub use error::{Result, SSTableError};
pub use format::{Footer, TableMeta, FOOTER_BYTES, SSTABLE_FORMAT_VERSION, SSTABLE_MAGIC};
pub use iterator::SSTableIterator;
pub use merge::{vec_source, MergeIterator, MergeSource};
pub use reader::SSTableReader;
pub use writer::{SSTableBuilder, SSTableOptions, SSTableWriter, TableInfo};

#[cfg(test)]
mod tests;
