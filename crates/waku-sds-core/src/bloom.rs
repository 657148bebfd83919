//! Bloom digest of seen message ids.
//!
//! Each participant attaches its filter to outgoing messages so that
//! senders can infer which of their messages were probably received.
//! False positives are possible; false negatives never are.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Largest supported number of hash functions.
pub const MAX_K_HASHES: u32 = 12;

/// Largest supported bits-per-element ratio (4 bytes per element).
pub const MAX_BITS_PER_ELEMENT: u32 = 32;

/// Sizing of a bloom filter.
///
/// Two filters interoperate only if they were built with equal options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomFilterOptions {
    /// Expected number of inserted elements.
    pub capacity: usize,
    /// Target false positive rate at capacity.
    pub error_rate: f64,
    /// Override the derived number of hash functions.
    pub k_hashes: Option<u32>,
    /// Override the derived bits per element.
    pub force_bits_per_element: Option<u32>,
}

impl Default for BloomFilterOptions {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            error_rate: 0.001,
            k_hashes: None,
            force_bits_per_element: None,
        }
    }
}

/// Theoretical false positive rate with `k` hashes and `bits_per_element` bits.
pub fn false_positive_rate(k: u32, bits_per_element: u32) -> f64 {
    let k = f64::from(k);
    let ratio = f64::from(bits_per_element);
    (1.0 - (-k / ratio).exp()).powf(k)
}

/// Smallest bits-per-element ratio whose false positive rate is below `target`.
pub fn bits_per_element_for(k: u32, target: f64) -> Result<u32> {
    if k == 0 || k > MAX_K_HASHES {
        return Err(CoreError::InvalidBloomOptions(format!(
            "k must be in 1..={}, got {}",
            MAX_K_HASHES, k
        )));
    }
    (2..=MAX_BITS_PER_ELEMENT)
        .find(|&ratio| false_positive_rate(k, ratio) < target)
        .ok_or_else(|| {
            CoreError::InvalidBloomOptions(format!(
                "error rate {} not achievable with k={} under {} bits per element",
                target, k, MAX_BITS_PER_ELEMENT
            ))
        })
}

/// A fixed-size bloom filter over string items.
#[derive(Clone, PartialEq)]
pub struct BloomFilter {
    options: BloomFilterOptions,
    k_hashes: u32,
    total_bits: usize,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Create an empty filter sized by `options`.
    pub fn new(options: BloomFilterOptions) -> Result<Self> {
        if options.capacity == 0 {
            return Err(CoreError::InvalidBloomOptions("capacity must be > 0".into()));
        }
        if !(options.error_rate > 0.0 && options.error_rate < 1.0) {
            return Err(CoreError::InvalidBloomOptions(format!(
                "error rate must be in (0, 1), got {}",
                options.error_rate
            )));
        }

        let k_hashes = match options.k_hashes {
            Some(k) => k,
            None => (1.0 / options.error_rate).log2().ceil() as u32,
        };
        let bits_per_element = match options.force_bits_per_element {
            Some(b) if b > 0 => b,
            Some(_) => {
                return Err(CoreError::InvalidBloomOptions(
                    "bits per element must be > 0".into(),
                ))
            }
            None => bits_per_element_for(k_hashes, options.error_rate)?,
        };
        if k_hashes == 0 {
            return Err(CoreError::InvalidBloomOptions("k must be > 0".into()));
        }

        let total_bits = options.capacity * bits_per_element as usize;
        let bits = vec![0u8; total_bits.div_ceil(8)];

        Ok(Self {
            options,
            k_hashes,
            total_bits,
            bits,
        })
    }

    /// Restore a filter from its serialized bits.
    ///
    /// The byte length must match what `options` would allocate.
    pub fn from_bytes(bytes: &[u8], options: BloomFilterOptions) -> Result<Self> {
        let mut filter = Self::new(options)?;
        if bytes.len() != filter.bits.len() {
            return Err(CoreError::BloomSizeMismatch {
                expected: filter.bits.len(),
                actual: bytes.len(),
            });
        }
        filter.bits.copy_from_slice(bytes);
        Ok(filter)
    }

    /// Serialize the bit array. Bit `i` lives in byte `i / 8`.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.clone()
    }

    pub fn insert(&mut self, item: &str) {
        for n in 0..self.k_hashes {
            let index = self.hash_n(item, n);
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// `true` if the item may have been inserted; `false` if it certainly was not.
    pub fn lookup(&self, item: &str) -> bool {
        (0..self.k_hashes).all(|n| {
            let index = self.hash_n(item, n);
            self.bits[index / 8] & (1 << (index % 8)) != 0
        })
    }

    pub fn options(&self) -> &BloomFilterOptions {
        &self.options
    }

    pub fn k_hashes(&self) -> u32 {
        self.k_hashes
    }

    pub fn total_bits(&self) -> usize {
        self.total_bits
    }

    pub fn error_rate(&self) -> f64 {
        self.options.error_rate
    }

    fn hash_n(&self, item: &str, n: u32) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(item.as_bytes());
        hasher.update(n.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % self.total_bits as u64) as usize
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("k_hashes", &self.k_hashes)
            .field("total_bits", &self.total_bits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{distributions::Alphanumeric, Rng};

    fn random_strings(count: usize, len: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                (&mut rng)
                    .sample_iter(&Alphanumeric)
                    .take(len)
                    .map(char::from)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_default_parameters() {
        let filter = BloomFilter::new(BloomFilterOptions::default()).unwrap();
        assert_eq!(filter.k_hashes(), 10);
        assert_eq!(filter.total_bits() / 10_000, 15);
        assert_eq!(filter.to_bytes().len(), 150_000 / 8);
    }

    #[test]
    fn test_forced_parameters() {
        let filter = BloomFilter::new(BloomFilterOptions {
            capacity: 10_000,
            error_rate: 0.001,
            k_hashes: Some(4),
            force_bits_per_element: Some(20),
        })
        .unwrap();
        assert_eq!(filter.k_hashes(), 4);
        assert_eq!(filter.total_bits(), 200_000);
    }

    #[test]
    fn test_unachievable_options_rejected() {
        let result = BloomFilter::new(BloomFilterOptions {
            error_rate: 1e-12,
            k_hashes: Some(2),
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::InvalidBloomOptions(_))));

        let result = BloomFilter::new(BloomFilterOptions {
            capacity: 0,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut filter = BloomFilter::new(BloomFilterOptions::default()).unwrap();
        assert!(!filter.lookup("test string"));
        filter.insert("test string");
        assert!(filter.lookup("test string"));
        assert!(!filter.lookup("different string"));
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut filter = BloomFilter::new(BloomFilterOptions::default()).unwrap();
        filter.insert("x");
        let once = filter.to_bytes();
        filter.insert("x");
        assert_eq!(once, filter.to_bytes());
    }

    #[test]
    fn test_special_patterns() {
        let mut filter = BloomFilter::new(BloomFilterOptions::default()).unwrap();
        let patterns = [
            "shortstr".to_string(),
            "a".repeat(1000),
            "special@#$%^&*()".to_string(),
            "unicode→★∑≈".to_string(),
            "pattern".repeat(10),
        ];
        for p in &patterns {
            filter.insert(p);
        }
        for p in &patterns {
            assert!(filter.lookup(p));
        }
    }

    #[test]
    fn test_error_rate_and_no_false_negatives() {
        let mut filter = BloomFilter::new(BloomFilterOptions::default()).unwrap();
        let inserted = random_strings(10_000, 7);
        for item in &inserted {
            filter.insert(item);
        }
        for item in &inserted {
            assert!(filter.lookup(item));
        }

        // Probes have a different length so none were inserted.
        let probes = random_strings(5_000, 8);
        let false_positives = probes.iter().filter(|p| filter.lookup(p)).count();
        let rate = false_positives as f64 / probes.len() as f64;
        assert!(rate < filter.error_rate() * 1.5, "observed rate {}", rate);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut filter = BloomFilter::new(BloomFilterOptions::default()).unwrap();
        let items = random_strings(500, 12);
        for item in &items {
            filter.insert(item);
        }
        let restored =
            BloomFilter::from_bytes(&filter.to_bytes(), filter.options().clone()).unwrap();
        assert_eq!(restored, filter);
        for item in &items {
            assert!(restored.lookup(item));
        }
    }

    #[test]
    fn test_from_bytes_size_mismatch() {
        let result = BloomFilter::from_bytes(&[0u8; 10], BloomFilterOptions::default());
        assert!(matches!(
            result,
            Err(CoreError::BloomSizeMismatch {
                expected: 18_750,
                actual: 10
            })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_false_negatives(items in prop::collection::vec(".{0,40}", 0..200)) {
            let mut filter = BloomFilter::new(BloomFilterOptions {
                capacity: 1_000,
                ..Default::default()
            }).unwrap();
            for item in &items {
                filter.insert(item);
            }
            for item in &items {
                prop_assert!(filter.lookup(item));
            }
        }
    }
}
