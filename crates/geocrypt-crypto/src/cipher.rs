//! Repeating-key XOR payload transform
//!
//! `out[i] = payload[i] ^ key[i % KEY_SIZE]`. Applying it twice with the
//! same key returns the input, so the same call encrypts and decrypts.
//! There is no nonce and no tag; see the crate docs.

use crate::key::SymmetricKey;

/// Transform a payload into a new buffer.
pub fn transform(payload: &[u8], key: &SymmetricKey) -> Vec<u8> {
    let mut out = payload.to_vec();
    transform_in_place(&mut out, key);
    out
}

/// Transform a payload without allocating.
pub fn transform_in_place(payload: &mut [u8], key: &SymmetricKey) {
    let key = key.as_bytes();
    for (byte, k) in payload.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}
