//! Bloom filter bit math.
//!
//! A space-efficient approximate set over raw hash bytes. False positives
//! are possible and tolerated (a rare extra suppression); false negatives
//! are not. Positions are derived with murmur3 double hashing,
//! `h(i) = h1 + i·h2`, which is cheaper than k independent hashes.

use std::io::Cursor;

use bitvec::prelude::*;

/// Sizing derived from an expected element count and target false positive
/// rate:
///
/// - `m = -n·ln(fpr) / ln(2)²` (bits)
/// - `k = (m/n)·ln(2)` (hash functions)
#[derive(Clone, Debug, PartialEq)]
pub struct BloomParams {
    pub size_bits: usize,
    pub hash_count: usize,
}

/// Calculate optimal filter parameters for the given constraints.
pub fn optimal_parameters(expected_elements: usize, target_fpr: f64) -> BloomParams {
    use std::f64::consts::LN_2;

    if expected_elements == 0 {
        return BloomParams {
            size_bits: 1,
            hash_count: 1,
        };
    }

    let n = expected_elements as f64;
    let m = (-n * target_fpr.ln() / (LN_2 * LN_2)).ceil() as usize;
    let k = ((m as f64 / n) * LN_2).round() as usize;

    BloomParams {
        size_bits: m.max(1),
        hash_count: k.clamp(1, 32),
    }
}

/// A fixed-size bloom filter bit array.
#[derive(Clone, Debug)]
pub struct BloomBits {
    bits: BitVec<u8, Lsb0>,
    hash_count: usize,
    size_bits: usize,
    inserted: usize,
}

impl BloomBits {
    pub fn new(size_bits: usize, hash_count: usize) -> Self {
        Self {
            bits: bitvec![u8, Lsb0; 0; size_bits],
            hash_count,
            size_bits,
            inserted: 0,
        }
    }

    pub fn with_params(params: &BloomParams) -> Self {
        Self::new(params.size_bits, params.hash_count)
    }

    /// Insert an element. Afterwards `contains(element)` is guaranteed to
    /// return true.
    pub fn insert(&mut self, element: &[u8]) {
        for position in self.positions(element) {
            self.bits.set(position, true);
        }
        self.inserted += 1;
    }

    /// True if the element might have been inserted; false means it
    /// definitely was not.
    pub fn contains(&self, element: &[u8]) -> bool {
        self.positions(element).into_iter().all(|position| self.bits[position])
    }

    /// Reset all bits.
    pub fn clear(&mut self) {
        self.bits.fill(false);
        self.inserted = 0;
    }

    /// Number of elements inserted since the last clear.
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    pub fn size_bits(&self) -> usize {
        self.size_bits
    }

    fn positions(&self, element: &[u8]) -> Vec<usize> {
        let h1 = murmur64(element, 0);
        let h2 = murmur64(element, 1);
        (0..self.hash_count)
            .map(|i| {
                let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
                (hash % self.size_bits as u64) as usize
            })
            .collect()
    }
}

fn murmur64(element: &[u8], seed: u32) -> u64 {
    let mut cursor = Cursor::new(element);
    murmur3::murmur3_x64_128(&mut cursor, seed).unwrap_or(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomBits::new(10_000, 7);
        let elements: Vec<Vec<u8>> = (0..500u32).map(|i| i.to_be_bytes().to_vec()).collect();

        for element in &elements {
            filter.insert(element);
        }
        for element in &elements {
            assert!(
                filter.contains(element),
                "inserted element must always be found"
            );
        }
    }

    #[test]
    fn test_false_positive_rate_bounded() {
        let target_fpr = 0.01;
        let n = 1_000;
        let mut filter = BloomBits::with_params(&optimal_parameters(n, target_fpr));

        for i in 0..n as u32 {
            filter.insert(&i.to_be_bytes());
        }

        let mut false_positives = 0;
        let probes = 50_000u32;
        for i in 0..probes {
            if filter.contains(&(i + 1_000_000).to_be_bytes()) {
                false_positives += 1;
            }
        }

        let actual_fpr = false_positives as f64 / probes as f64;
        assert!(
            actual_fpr <= target_fpr * 1.5,
            "actual FPR {} exceeds 1.5x target {}",
            actual_fpr,
            target_fpr
        );
    }

    #[test]
    fn test_clear_resets_filter() {
        let mut filter = BloomBits::new(1_000, 5);
        filter.insert(b"element");
        assert_eq!(filter.inserted(), 1);

        filter.clear();
        assert_eq!(filter.inserted(), 0);
        assert!(!filter.contains(b"element"));
    }

    #[test]
    fn test_optimal_parameters_scale_with_constraints() {
        let loose = optimal_parameters(1_000, 0.1);
        let tight = optimal_parameters(1_000, 0.001);
        assert!(
            tight.size_bits > loose.size_bits,
            "a lower FPR needs more bits"
        );

        let small = optimal_parameters(100, 0.01);
        let large = optimal_parameters(10_000, 0.01);
        assert!(
            large.size_bits > small.size_bits,
            "more elements need more bits"
        );
        assert!(small.hash_count >= 1 && small.hash_count <= 32);
    }

    #[test]
    fn test_zero_expected_elements() {
        let params = optimal_parameters(0, 0.01);
        assert_eq!(params.size_bits, 1);
        assert_eq!(params.hash_count, 1);
    }
}
