use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use geocrypt_geo::LocationTag;

/// Storage-assigned identifier of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The authenticated caller on whose behalf storage calls are made.
///
/// The bearer credential is issued by the auth service and attached to
/// every storage request; it is never logged.
#[derive(Debug)]
pub struct Requester {
    pub user_id: String,
    pub credential: SecretString,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            credential: SecretString::from(credential.into()),
        }
    }
}

/// Upload location as recorded alongside a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoredLocation {
    /// The uploader's geohash
    Plain(LocationTag),
    /// Hex SHA-256 of the uploader's geohash
    Hashed(String),
}

/// Metadata for an uploaded file. Owned by storage; immutable except for deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub filename: String,
    pub mimetype: String,
    /// Ciphertext size in bytes (equal to the plaintext size)
    pub size: u64,
    pub location: StoredLocation,
    pub owner: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

/// A ciphertext ready to be submitted to storage
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub filename: String,
    pub mimetype: String,
    pub ciphertext: Vec<u8>,
    pub location: LocationTag,
}

/// Ciphertext released by storage for one file
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub file_id: FileId,
    pub ciphertext: Vec<u8>,
}

/// Decrypted file contents ready to hand to the platform share sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SharePayload {
    pub filename: String,
    pub mimetype: String,
    pub bytes: Vec<u8>,
}

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
