//! geocrypt-crypto: location-derived keys and payload transform
//!
//! Pipeline: location tag → SHA-256 → hex digest (key material) → XOR stream
//!
//! ```text
//! "u33dc0m" ──SHA-256──► ef1fed42…206b (64 ASCII bytes)
//!                                 │
//! plaintext[i] XOR key[i mod 64] ─┴─► ciphertext   (and back again)
//! ```
//!
//! # Security
//!
//! This is a repeating-key XOR with a 64-byte period and no authentication
//! tag. The key depends only on a public-ish 7 character cell name, so
//! anyone who can guess the cell can decrypt, and a wrong key produces
//! garbage rather than an error. The format is kept because every blob
//! already in storage was written with it; replacing it requires a format
//! version bump and re-encryption of existing blobs.

pub mod cipher;
pub mod key;

pub use cipher::{transform, transform_in_place};
pub use key::{derive_key, hash_location_tag, SymmetricKey};

/// Size of the SHA-256 digest of a location tag (256-bit)
pub const DIGEST_SIZE: usize = 32;

/// Size of the key material fed to the cipher (hex rendering of the digest)
pub const KEY_SIZE: usize = DIGEST_SIZE * 2;
