//! Concrete implementations of the outbound ports.

pub mod assigner;
pub mod bloom;

pub use assigner::{EmptyShortIdAssigner, SequentialShortIdAssigner};
pub use bloom::RotatingBloomFilter;
