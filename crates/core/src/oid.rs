//! Opaque object-id generation for the implicit `_id` primary key
//!
//! Ids are 24 hex digits: a 4-byte timestamp (seconds), a 5-byte per-process
//! random component, and a 3-byte wrapping counter with a random start. The
//! only goal is to avoid intra-process collisions; no cryptographic property
//! is claimed.

use once_cell::sync::Lazy;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};

static PROCESS_RANDOM: Lazy<[u8; 5]> = Lazy::new(|| {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
});

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    AtomicU32::new(u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]))
});

/// Generate a fresh 24-hex-digit object id
pub fn generate() -> String {
    let seconds = chrono::Utc::now().timestamp() as u32;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

    let mut out = String::with_capacity(24);
    for byte in seconds.to_be_bytes() {
        let _ = write!(out, "{byte:02x}");
    }
    for byte in *PROCESS_RANDOM {
        let _ = write!(out, "{byte:02x}");
    }
    for byte in &count.to_be_bytes()[1..] {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_shape() {
        let id = generate();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unique_within_process() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_counter_component_increments() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        // timestamp + process components are shared within one process
        assert_eq!(a[8..18], b[8..18]);
    }
}
