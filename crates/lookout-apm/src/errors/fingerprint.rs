//! Error fingerprinting for deduplication.
//!
//! The fingerprint is a SHA-256 hash of the error type and message only.
//! Stack text and request context never contribute, so a recurring failure
//! collapses into one record regardless of where or for whom it happened.

use sha2::{Digest, Sha256};

/// Compute the fingerprint for an error as a hex string.
#[must_use]
pub fn fingerprint(error_type: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(error_type.as_bytes());
    // Separator keeps ("ab", "c") and ("a", "bc") apart.
    hasher.update([0u8]);
    hasher.update(message.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("TypeError", "x is undefined");
        let b = fingerprint("TypeError", "x is undefined");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_type_and_message() {
        let base = fingerprint("TypeError", "x is undefined");
        assert_ne!(base, fingerprint("ReferenceError", "x is undefined"));
        assert_ne!(base, fingerprint("TypeError", "y is undefined"));
        assert_ne!(fingerprint("ab", "c"), fingerprint("a", "bc"));
    }
}
