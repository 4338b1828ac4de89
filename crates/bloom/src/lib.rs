//! # Bloom Filter
//!
//! Per-SSTable membership filter. A reader consults it before touching the
//! data region: `false` means the key is definitely absent, `true` means it
//! may be present (false positives at roughly the configured rate, never
//! false negatives).
//!
//! ## Sizing
//!
//! [`optimal_params`] picks the bit count `m` and hash count `k` for `n`
//! keys at false positive rate `p`:
//!
//! ```text
//! m = ceil(-n * ln(p) / ln(2)^2)
//! k = round(m / n * ln(2))
//! ```
//!
//! ## Hashing
//!
//! Kirsch-Mitzenmacher double hashing: probe `i` is `h1 + i * h2 (mod m)`.
//! `h1` is FNV-1a over the key; `h2` is FNV-1a over the key salted with the
//! low 32 bits of `h1`. Both go through the MurmurHash3 finalizer, and `h2`
//! is forced odd.
//!
//! ## Serialized form
//!
//! ```text
//! [num_bits: u64][num_hashes: u32][items: u64][bits_len: u32][bits]
//! ```
//!
//! All integers are little-endian.
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"user:1001");
//! assert!(bf.may_contain(b"user:1001"));
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Largest bit array accepted when decoding.
const MAX_BLOOM_BYTES: u32 = 128 * 1024 * 1024;

/// Rates are clamped into this range before sizing.
const MIN_FP_RATE: f64 = 1e-9;
const MAX_FP_RATE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum BloomError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid bloom filter: {0}")]
    Invalid(String),
}

/// Bit count and hash count for `expected_items` keys at
/// `false_positive_rate`.
///
/// `expected_items` of 0 is treated as 1, and the rate is clamped to
/// `[1e-9, 0.5]`, so the result is always usable. At least 8 bits and one
/// hash function.
pub fn optimal_params(expected_items: usize, false_positive_rate: f64) -> (u64, u32) {
    let n = expected_items.max(1) as f64;
    let p = if false_positive_rate.is_nan() {
        MAX_FP_RATE
    } else {
        false_positive_rate.clamp(MIN_FP_RATE, MAX_FP_RATE)
    };
    let ln2 = std::f64::consts::LN_2;

    let bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
    let hashes = ((bits as f64 / n) * ln2).round().max(1.0) as u32;
    (bits, hashes)
}

#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
    items: u64,
}

impl BloomFilter {
    /// An empty filter sized by [`optimal_params`].
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let (num_bits, num_hashes) = optimal_params(expected_items, false_positive_rate);
        Self::with_params(num_bits, num_hashes)
    }

    /// An empty filter with explicit geometry. Zero values are raised to
    /// 8 bits and one hash.
    pub fn with_params(num_bits: u64, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(8);
        Self {
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes: num_hashes.max(1),
            items: 0,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let probes = Probes::new(key, self.num_bits);
        for bit in probes.take(self.num_hashes as usize) {
            self.bits[(bit >> 3) as usize] |= 1 << (bit & 7);
        }
        self.items += 1;
    }

    /// `false` only if `key` was never inserted.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        Probes::new(key, self.num_bits)
            .take(self.num_hashes as usize)
            .all(|bit| self.bits[(bit >> 3) as usize] & (1 << (bit & 7)) != 0)
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Insert calls so far (duplicates counted).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.items
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Expected false positive rate at the current fill:
    /// `(1 - e^(-k * n / m))^k`.
    #[must_use]
    pub fn estimated_fp_rate(&self) -> f64 {
        let k = self.num_hashes as f64;
        let fill = 1.0 - (-k * self.items as f64 / self.num_bits as f64).exp();
        fill.powf(k)
    }

    /// Length of [`to_bytes`](BloomFilter::to_bytes).
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + 4 + 8 + 4 + self.bits.len()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.num_bits)?;
        w.write_u32::<LittleEndian>(self.num_hashes)?;
        w.write_u64::<LittleEndian>(self.items)?;
        w.write_u32::<LittleEndian>(self.bits.len() as u32)?;
        w.write_all(&self.bits)
    }

    /// Decodes a filter written by [`write_to`](BloomFilter::write_to).
    ///
    /// # Errors
    ///
    /// [`BloomError::Invalid`] if the bit array exceeds 128 MiB, does not
    /// match `num_bits`, or the hash count is zero. Short input is
    /// [`BloomError::Io`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, BloomError> {
        let num_bits = r.read_u64::<LittleEndian>()?;
        let num_hashes = r.read_u32::<LittleEndian>()?;
        let items = r.read_u64::<LittleEndian>()?;
        let bits_len = r.read_u32::<LittleEndian>()?;

        if bits_len > MAX_BLOOM_BYTES {
            return Err(BloomError::Invalid(format!("bit array of {} bytes", bits_len)));
        }
        if num_bits == 0 || num_bits.div_ceil(8) != u64::from(bits_len) {
            return Err(BloomError::Invalid(format!(
                "{} bits stored in {} bytes",
                num_bits, bits_len
            )));
        }
        if num_hashes == 0 {
            return Err(BloomError::Invalid("zero hash functions".to_string()));
        }

        let mut bits = vec![0u8; bits_len as usize];
        r.read_exact(&mut bits)?;
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            items,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        // a Vec sink never fails
        let _ = self.write_to(&mut out);
        out
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self, BloomError> {
        Self::read_from(&mut data)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("items", &self.items)
            .finish()
    }
}

/// Bit positions probed for one key.
struct Probes {
    next: u64,
    step: u64,
    num_bits: u64,
}

impl Probes {
    fn new(key: &[u8], num_bits: u64) -> Self {
        let h1 = fnv1a(FNV_OFFSET, key);
        let salt = (h1 as u32).to_le_bytes();
        let h2 = fnv1a(h1, &salt);
        Self {
            next: mix(h1),
            step: mix(h2) | 1,
            num_bits,
        }
    }
}

impl Iterator for Probes {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let bit = self.next % self.num_bits;
        self.next = self.next.wrapping_add(self.step);
        Some(bit)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(state: u64, data: &[u8]) -> u64 {
    data.iter()
        .fold(state, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// MurmurHash3 fmix64. Spreads FNV output into the low bits used by `% m`.
fn mix(mut h: u64) -> u64 {
    h = (h ^ (h >> 33)).wrapping_mul(0xff51_afd7_ed55_8ccd);
    h = (h ^ (h >> 33)).wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^ (h >> 33)
}
