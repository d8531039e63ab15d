use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of a string
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute SHA-256 hash over a sequence of lines, joined with `\n`.
///
/// Used to fingerprint ordered name lists: two sequences hash equal only if
/// they hold the same names in the same order.
pub fn compute_sequence_hash<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(item.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash("hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sequence_hash_matches_joined_string() {
        assert_eq!(
            compute_sequence_hash(["a", "b", "c"]),
            compute_hash("a\nb\nc")
        );
    }

    #[test]
    fn test_sequence_hash_is_order_sensitive() {
        assert_ne!(
            compute_sequence_hash(["a", "b"]),
            compute_sequence_hash(["b", "a"])
        );
    }
}
