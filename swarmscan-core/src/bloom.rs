//! Salted bloom filter backing scan digests.

use sha2::{Digest as _, Sha256};

use crate::error::{CoreError, Result};

/// Target false-positive rate for digest filters.
pub const DEFAULT_FP_RATE: f64 = 0.001;

/// Most hash functions a filter may use.
pub const MAX_HASHES: u32 = 32;

/// Fixed-size bloom filter whose bit positions depend on a per-filter salt.
///
/// Positions come from double hashing over SHA-256(salt || key), so the
/// same key lands on unrelated bits in filters with different salts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Size a filter for `expected_keys` entries at the given false-positive rate.
    pub fn with_capacity(expected_keys: usize, fp_rate: f64) -> Self {
        let n = expected_keys.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, MAX_HASHES as f64) as u32;
        Self {
            bits: vec![0; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Rebuild a filter from its serialized parts. The parts come from
    /// peers and are checked against the bytes actually present.
    pub fn from_parts(num_bits: u64, num_hashes: u32, bits: Vec<u8>) -> Result<Self> {
        if num_bits == 0 || num_hashes == 0 || num_hashes > MAX_HASHES {
            return Err(CoreError::InvalidContainer(format!(
                "bloom filter with {} bits and {} hashes",
                num_bits, num_hashes
            )));
        }
        let expected = num_bits.div_ceil(8);
        if bits.len() as u64 != expected {
            return Err(CoreError::InvalidContainer(format!(
                "bloom filter expects {} bytes, found {}",
                expected,
                bits.len()
            )));
        }
        Ok(Self { bits, num_bits, num_hashes })
    }

    /// Insert a key. Returns true if at least one bit was newly set.
    pub fn insert(&mut self, salt: u32, key: &[u8]) -> bool {
        let mut changed = false;
        for pos in self.positions(salt, key) {
            let (byte, mask) = locate(pos);
            if self.bits[byte] & mask == 0 {
                self.bits[byte] |= mask;
                changed = true;
            }
        }
        changed
    }

    /// Membership test. May return false positives, never false negatives.
    pub fn contains(&self, salt: u32, key: &[u8]) -> bool {
        self.positions(salt, key).all(|pos| {
            let (byte, mask) = locate(pos);
            self.bits[byte] & mask != 0
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn positions(&self, salt: u32, key: &[u8]) -> impl Iterator<Item = u64> {
        let mut hasher = Sha256::new();
        hasher.update(salt.to_le_bytes());
        hasher.update(key);
        let hash = hasher.finalize();

        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&hash[0..8]);
        hi.copy_from_slice(&hash[8..16]);
        let h1 = u64::from_le_bytes(lo);
        let h2 = u64::from_le_bytes(hi) | 1;
        let m = self.num_bits;

        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }
}

fn locate(pos: u64) -> (usize, u8) {
    ((pos / 8) as usize, 1u8 << (pos % 8))
}
