//! Key derivation: location tag → SHA-256 → symmetric key

use geocrypt_geo::LocationTag;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{DIGEST_SIZE, KEY_SIZE};

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Key material derived from exactly one location tag.
///
/// Holds the lowercase hex rendering of SHA-256(tag), which is what the
/// existing blobs were XOR'd with. Never persisted. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        // constant-time compare; keys are only compared in tests and diagnostics
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for SymmetricKey {}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the key for a location tag. Pure and deterministic.
pub fn derive_key(tag: &LocationTag) -> SymmetricKey {
    let mut digest: [u8; DIGEST_SIZE] = Sha256::digest(tag.as_str().as_bytes()).into();

    let mut bytes = [0u8; KEY_SIZE];
    for (i, byte) in digest.iter().enumerate() {
        bytes[2 * i] = HEX[(byte >> 4) as usize];
        bytes[2 * i + 1] = HEX[(byte & 0x0f) as usize];
    }
    digest.zeroize();

    SymmetricKey::from_bytes(bytes)
}

/// One-way fingerprint of a tag, as stored when a record must not reveal
/// the upload location. Equal to the hex key material as a string.
pub fn hash_location_tag(tag: &LocationTag) -> String {
    let key = derive_key(tag);
    // hex alphabet is ASCII
    key.as_bytes().iter().map(|&b| b as char).collect()
}
