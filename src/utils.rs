// src/utils.rs
// Shared utility functions used across the codebase

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of arbitrary bytes.
///
/// Used for invocation-context and query digests: the store never holds
/// plaintext arguments or queries, only their hashes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Truncate a string to at most `max_chars` characters with ellipsis.
///
/// Cuts on a character boundary, so multi-byte input never panics.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}...", &s[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        // sha256("") is the well-known empty digest
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hex_stable() {
        assert_eq!(sha256_hex(b"create issue"), sha256_hex(b"create issue"));
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_multibyte_cuts_on_char_boundary() {
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("日本語のテスト", 3), "日本語...");
        assert_eq!(truncate("日本語", 10), "日本語");
    }
}
