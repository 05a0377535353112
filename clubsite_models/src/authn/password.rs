//! Argon2id password hashes, stored as PHC strings

use std::sync::LazyLock;

use argon2::Argon2;
use argon2::PasswordHash;
use argon2::PasswordHasher as _;
use argon2::PasswordVerifier as _;
use argon2::password_hash::SaltString;

use crate::Error;

pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt).map_err(Error::password_hashing)?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(Error::password_hashing)?;
    Ok(hash.to_string())
}

/// Checks `password` against a PHC string, `false` for malformed hashes
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let Ok(hash) = PasswordHash::new(encoded) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .is_ok()
}

// Same parameters as the stored hashes
static DECOY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("decoy").unwrap_or_default());

/// Burns one verification for a username that does not exist
pub fn verify_decoy(password: &str) {
    let _ = verify_password(password, &DECOY_HASH);
}
