use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const PUBLISHABLE_PREFIX: &str = "pk-lf-";
pub const SECRET_PREFIX: &str = "sk-lf-";

/// Freshly generated key material. The raw secret exists only here; the
/// database keeps the hash and a display form.
#[derive(Debug, Clone)]
pub struct KeySet {
    pub publishable_key: String,
    pub secret_key: String,
    pub hashed_secret_key: String,
    pub display_secret_key: String,
}

pub fn generate_key_set() -> KeySet {
    let publishable_key =
        format!("{PUBLISHABLE_PREFIX}{}", uuid::Uuid::new_v4());
    let secret_key = format!("{SECRET_PREFIX}{}", uuid::Uuid::new_v4());
    let hashed_secret_key = hash_secret_key(&secret_key);
    let display_secret_key = display_secret_key(&secret_key);
    KeySet {
        publishable_key,
        secret_key,
        hashed_secret_key,
        display_secret_key,
    }
}

/// Hex-encoded SHA-256 of the secret key.
pub fn hash_secret_key(secret_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_secret_key(secret_key: &str, stored_hash: &str) -> bool {
    hash_secret_key(secret_key)
        .as_bytes()
        .ct_eq(stored_hash.as_bytes())
        .into()
}

/// `sk-lf-...abcd`: the prefix plus the last four characters.
pub fn display_secret_key(secret_key: &str) -> String {
    let tail_start = secret_key
        .char_indices()
        .rev()
        .nth(3)
        .map_or(0, |(i, _)| i);
    format!("{SECRET_PREFIX}...{}", &secret_key[tail_start..])
}
