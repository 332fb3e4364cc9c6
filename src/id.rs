//! Short-identifier generation for connection IDs and outbound request IDs.
//!
//! Generates a 24-character hex string from 12 random bytes, as called out in the
//! wire protocol section of the design. Collision resistance is statistical, not
//! cryptographic: callers that need guaranteed uniqueness across a cluster should
//! namespace IDs themselves.

use rand::RngCore;

/// Generate a 24-char hex identifier (12 random bytes).
pub fn generate() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut s = String::with_capacity(24);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_24_char_hex() {
        let id = generate();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generates_unique_ids() {
        let mut seen = HashSet::new();
        for _ in 0..100_000 {
            assert!(seen.insert(generate()), "duplicate id generated");
        }
    }
}
