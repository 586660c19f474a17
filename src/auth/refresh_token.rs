/// Refresh Token Material
///
/// Refresh tokens are:
/// - 32 bytes from the OS CSPRNG, base64url-encoded without padding (256 bits of entropy)
/// - Hashed with SHA-256 before storage (the plaintext is never persisted or logged)
///
/// A fast unsalted hash is enough here: the input is already high-entropy and secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate a new opaque refresh token
///
/// The token is returned in plaintext; this is the value handed to the client.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic lookup key for a refresh token (hex SHA-256)
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_refresh_token() {
        let token = generate_refresh_token();

        // 32 bytes -> 43 base64url characters without padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), REFRESH_TOKEN_BYTES);
    }

    #[test]
    fn test_token_hashing() {
        let token = generate_refresh_token();
        let hash1 = hash_refresh_token(&token);
        let hash2 = hash_refresh_token(&token);

        assert_eq!(hash1, hash2);
        assert_ne!(token, hash1);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_many_tokens_never_collide() {
        let hashes: HashSet<String> = (0..1000)
            .map(|_| hash_refresh_token(&generate_refresh_token()))
            .collect();

        assert_eq!(hashes.len(), 1000);
    }
}
