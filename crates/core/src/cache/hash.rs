//! Content fingerprints used as cache keys.

use sha2::{Digest, Sha256};

/// Compute the fingerprint of a keying string.
///
/// In content mode the keying string is the full cleaned page; in URL mode it
/// is the output of [`url_key_material`].
pub fn compute_fingerprint(material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

/// Keying material for URL mode: the URL and the request variant.
pub fn url_key_material(url: &str, variant: &str) -> String {
    format!("{url}\n{variant}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stability() {
        let hash1 = compute_fingerprint("<main><p>Hello</p></main>");
        let hash2 = compute_fingerprint("<main><p>Hello</p></main>");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_fingerprint_single_byte_difference() {
        let hash1 = compute_fingerprint("<main><p>Hello</p></main>");
        let hash2 = compute_fingerprint("<main><p>Hellp</p></main>");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_url_key_different_variant() {
        let list = compute_fingerprint(&url_key_material("https://example.com", "list"));
        let detail = compute_fingerprint(&url_key_material("https://example.com", "detail"));
        assert_ne!(list, detail);
    }

    #[test]
    fn test_url_key_not_ambiguous() {
        let a = url_key_material("https://example.com/a", "b");
        let b = url_key_material("https://example.com/ab", "");
        assert_ne!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_format() {
        let hash = compute_fingerprint("anything");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
