use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of a bearer secret. The inputs are high-entropy
/// random tokens, not passwords, so no salt is involved; only the digest
/// ever reaches the store.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_secret("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn deterministic_and_distinct() {
        assert_eq!(hash_secret("token-1"), hash_secret("token-1"));
        assert_ne!(hash_secret("token-1"), hash_secret("token-2"));
    }
}
