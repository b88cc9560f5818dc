//! Change detection for source documents.
//!
//! A document's fingerprint is the SHA-256 hex digest of its full content.
//! Ingestion compares it against the stored fingerprint for the same path
//! and skips re-embedding when they are equal. Only whole-document equality
//! is checked; there is no partial diffing.

use sha2::{Digest, Sha256};

/// SHA-256 of `content`, as 64 lowercase hex characters.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn test_near_identical_documents_differ() {
        let pairs = [
            ("hello", "hello world"),
            ("# Runbook\n\nRestart the worker.", "# Runbook\n\nRestart the worker!"),
            ("timeout = 30", "timeout = 31"),
            ("trailing", "trailing\n"),
            ("Case", "case"),
        ];
        for (a, b) in pairs {
            assert_ne!(content_hash(a), content_hash(b), "{:?} vs {:?}", a, b);
        }
    }
}
