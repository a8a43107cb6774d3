//! Password hashing and random secrets.
//!
//! Passwords are stored as Argon2id PHC strings. Tokens and access keys are
//! random hex strings persisted only as SHA-256 digests.

use argon2::{
    Argon2,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;
const ACCESS_KEY_LEN: usize = 16;

/// Hash a password with a fresh random salt into a PHC string.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::encode_b64(&random_bytes::<SALT_LEN>())?;
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Check `password` against a PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    PasswordHash::new(encoded).is_ok_and(|hash| {
        Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok()
    })
}

/// Random bearer or email token, 64 hex characters.
pub fn random_token() -> String {
    hex::encode(random_bytes::<TOKEN_LEN>())
}

/// Random session access key, 32 hex characters.
pub fn random_access_key() -> String {
    hex::encode(random_bytes::<ACCESS_KEY_LEN>())
}

/// Hex SHA-256 digest of a secret.
pub fn digest_hex(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Whether `secret` hashes to the stored hex digest, compared in constant time.
pub fn matches_digest(secret: &str, stored_digest: &str) -> bool {
    bool::from(digest_hex(secret).as_bytes().ct_eq(stored_digest.as_bytes()))
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let encoded = hash_password("hunter22").unwrap();
        assert!(encoded.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &encoded));
        assert!(!verify_password("hunter23", &encoded));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        assert_ne!(hash_password("secret").unwrap(), hash_password("secret").unwrap());
    }

    #[test]
    fn malformed_hashes_never_match() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "sha256$10000$00$00"));
        assert!(!verify_password("x", "$argon2id$v=19$m=19456,t=2,p=1$garbage"));
        assert!(!verify_password("x", "$md5$abc"));
    }

    #[test]
    fn secrets_have_expected_shape() {
        assert_eq!(random_token().len(), 64);
        let key = random_access_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(matches_digest(&key, &digest_hex(&key)));
        assert!(!matches_digest(&key, &digest_hex("other")));
    }
}
