//! Correlation tag allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates request tags of the form `"<prefix>.<n>"`.
///
/// The prefix is four random hex digits chosen once per generator, so tags
/// from a previous connection are unlikely to collide with late responses
/// after a reconnect. The counter is atomic: concurrent callers always get
/// distinct tags.
///
/// ```rust
/// use tether_proto::TagGenerator;
///
/// let tags = TagGenerator::with_prefix("a1f3");
/// assert_eq!(tags.next(), "a1f3.1");
/// assert_eq!(tags.next(), "a1f3.2");
/// ```
#[derive(Debug)]
pub struct TagGenerator {
    prefix:  String,
    counter: AtomicU64,
}

impl TagGenerator {
    /// A generator with a random prefix.
    pub fn new() -> Self {
        let mut b = [0u8; 2];
        // Falls back to "0000" if the RNG fails; the counter alone keeps tags unique.
        let _ = getrandom::getrandom(&mut b);
        Self::with_prefix(format!("{:02x}{:02x}", b[0], b[1]))
    }

    /// A generator with a caller-chosen prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), counter: AtomicU64::new(0) }
    }

    /// The generator's prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Allocate the next tag.
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}.{n}", self.prefix)
    }
}

impl Default for TagGenerator {
    fn default() -> Self { Self::new() }
}
