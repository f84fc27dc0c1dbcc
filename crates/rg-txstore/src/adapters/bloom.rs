//! Rotating bloom filter adapter.
//!
//! Two filter generations bound saturation: once the current generation has
//! absorbed its expected element count, it becomes the previous generation
//! and a fresh one takes over. Membership checks consult both, so an
//! element stays visible for at least one full generation after insertion.

use parking_lot::RwLock;

use crate::domain::bloom::{optimal_parameters, BloomBits};
use crate::ports::outbound::ReEntryFilter;

pub struct RotatingBloomFilter {
    capacity: usize,
    generations: RwLock<Generations>,
}

struct Generations {
    current: BloomBits,
    previous: BloomBits,
}

impl RotatingBloomFilter {
    /// Sized so that each generation holds `expected_elements` at
    /// `target_fpr` false positive rate.
    pub fn new(expected_elements: usize, target_fpr: f64) -> Self {
        let params = optimal_parameters(expected_elements, target_fpr);
        Self {
            capacity: expected_elements.max(1),
            generations: RwLock::new(Generations {
                current: BloomBits::with_params(&params),
                previous: BloomBits::with_params(&params),
            }),
        }
    }
}

impl ReEntryFilter for RotatingBloomFilter {
    fn add(&self, element: &[u8]) {
        let mut generations = self.generations.write();
        let generations = &mut *generations;
        if generations.current.inserted() >= self.capacity {
            // The stale previous generation is recycled as the new current.
            std::mem::swap(&mut generations.current, &mut generations.previous);
            generations.current.clear();
        }
        generations.current.insert(element);
    }

    fn check(&self, element: &[u8]) -> bool {
        let generations = self.generations.read();
        generations.current.contains(element) || generations.previous.contains(element)
    }
}
