//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use crate::request::Scale;

/// Stable cache key: lowercase hex SHA-256 of the normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `s` has the shape of a derived key (64 lowercase hex chars).
    pub fn is_valid(s: &str) -> bool {
        s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Parse a previously derived key, e.g. a disk cache file name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::is_valid(s).then(|| Self(s.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a canonical URL and requested scale.
///
/// Fields are joined with `\n`, which a parsed URL never contains.
pub fn derive_key(url: &Url, scale: Scale) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(scale.canonical().as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::canonicalize;

    fn key(url: &str, w: i32, h: i32) -> CacheKey {
        derive_key(&canonicalize(url).unwrap(), Scale::from_dimensions(w, h))
    }

    #[test]
    fn test_key_stability() {
        assert_eq!(key("https://example.com/a.png", 10, 10), key("https://example.com/a.png", 10, 10));
    }

    #[test]
    fn test_key_known_value() {
        let url = Url::parse("https://example.com/a.png").unwrap();
        let expected = hex::encode(Sha256::digest(b"https://example.com/a.png\nnative"));
        assert_eq!(derive_key(&url, Scale::Native).as_str(), expected);
    }

    #[test]
    fn test_key_different_scale() {
        assert_ne!(key("https://example.com/a.png", 10, 10), key("https://example.com/a.png", 20, 20));
        assert_ne!(key("https://example.com/a.png", 10, 10), key("https://example.com/a.png", -1, -1));
    }

    #[test]
    fn test_key_different_url() {
        assert_ne!(key("https://example.com/a.png", 10, 10), key("https://example.com/b.png", 10, 10));
    }

    #[test]
    fn test_key_no_field_concatenation_collision() {
        assert_ne!(key("https://example.com/a", 1, 23), key("https://example.com/a1", 2, 3));
    }

    #[test]
    fn test_key_ignores_irrelevant_details() {
        assert_eq!(key("https://EXAMPLE.com/a.png#frag", -1, -1), key("https://example.com/a.png", -1, -1));
        assert_eq!(key("https://example.com/a.png", 50, -1), key("https://example.com/a.png", -1, -1));
    }

    #[test]
    fn test_key_format() {
        let k = key("https://example.com/a.png", -1, -1);
        assert_eq!(k.as_str().len(), 64);
        assert!(CacheKey::is_valid(k.as_str()));
        assert_eq!(CacheKey::parse(k.as_str()), Some(k));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(CacheKey::parse("not-a-key").is_none());
        assert!(CacheKey::parse(&"A".repeat(64)).is_none());
    }
}
