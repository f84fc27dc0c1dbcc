//! Outbound (driven) ports for the transaction store.
//!
//! These traits define the capabilities the store depends on. Test doubles
//! plug in directly; production adapters live in `crate::adapters`.

use shared_types::ShortId;

/// Time source for consistent timestamp handling.
///
/// Abstracted to allow testing with deterministic time.
pub trait TimeSource: Send + Sync {
    /// Returns the current time in Unix milliseconds.
    fn now_ms(&self) -> u64;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Source of fresh short IDs.
///
/// The assigner is the sole authority for alias uniqueness; the store never
/// inspects the returned value. A node that does not assign returns the
/// empty sentinel from every call.
pub trait ShortIdAssigner: Send + Sync {
    fn next(&self) -> ShortId;
}

/// Approximate membership filter backing long-term re-entry suppression.
///
/// False positives are tolerated; false negatives are not.
pub trait ReEntryFilter: Send + Sync {
    fn add(&self, element: &[u8]);
    fn check(&self, element: &[u8]) -> bool;
}

/// Mock time source for testing.
#[cfg(test)]
pub struct MockTimeSource {
    time: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MockTimeSource {
    pub fn new(initial_ms: u64) -> Self {
        Self {
            time: std::sync::atomic::AtomicU64::new(initial_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.time.fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl TimeSource for MockTimeSource {
    fn now_ms(&self) -> u64 {
        self.time.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_source_is_recent() {
        let source = SystemTimeSource;
        // After Jan 1, 2020.
        assert!(source.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_mock_time_source_advances() {
        let source = MockTimeSource::new(1_000);
        assert_eq!(source.now_ms(), 1_000);
        source.advance(500);
        assert_eq!(source.now_ms(), 1_500);
    }
}
