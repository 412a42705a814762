//! File records and ciphertext blobs on an OpenDAL operator
//!
//! Layout under the configured prefix:
//!
//! ```text
//! {prefix}/records/{id}.json   FileRecord (JSON, plain upload tag)
//! {prefix}/blobs/{id}          ciphertext
//! ```
//!
//! The persisted record always carries the plain upload tag so the release
//! check can measure distance. Whether clients see that tag or only its hash
//! is decided per store by [`ExposeLocation`].

use std::sync::Arc;

use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use geocrypt_core::config::{ExposeLocation, GeoConfig, StorageConfig};
use geocrypt_core::types::{
    unix_now, EncryptedBlob, FileId, FileRecord, NewUpload, Requester, StoredLocation,
};
use geocrypt_core::{GeocryptError, GeocryptResult};
use geocrypt_geo::{LocationTag, ProximityPolicy};
use geocrypt_otp::CodeVerifier;

/// The storage collaborator of the transfer coordinator.
///
/// Every call is made on behalf of a [`Requester`]; records belong to the
/// requester that created them.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn create_file(&self, requester: &Requester, upload: NewUpload)
        -> GeocryptResult<FileRecord>;

    async fn list_files(&self, requester: &Requester) -> GeocryptResult<Vec<FileRecord>>;

    async fn get_file(&self, requester: &Requester, id: &FileId) -> GeocryptResult<FileRecord>;

    /// Release the ciphertext of `id`.
    ///
    /// Implementations must check that `current` is within the allowed area
    /// of the upload location and that `code` is the live one-time code for
    /// the file before returning any bytes.
    async fn get_file_blob(
        &self,
        requester: &Requester,
        id: &FileId,
        current: &LocationTag,
        code: &str,
    ) -> GeocryptResult<EncryptedBlob>;

    async fn delete_file(&self, requester: &Requester, id: &FileId) -> GeocryptResult<()>;
}

/// On-disk form of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: FileId,
    filename: String,
    mimetype: String,
    size: u64,
    location: LocationTag,
    owner: String,
    created_at: u64,
}

impl StoredRecord {
    fn to_bytes(&self) -> GeocryptResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| GeocryptError::Storage(format!("serializing record {}: {e}", self.id)))
    }

    fn from_bytes(id: &FileId, data: &[u8]) -> GeocryptResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| GeocryptError::Storage(format!("corrupt record {id}: {e}")))
    }
}

pub struct OpendalStore {
    op: Operator,
    prefix: String,
    expose: ExposeLocation,
    policy: ProximityPolicy,
    verifier: Arc<dyn CodeVerifier>,
}

impl OpendalStore {
    pub fn new(op: Operator, prefix: impl Into<String>, verifier: Arc<dyn CodeVerifier>) -> Self {
        Self {
            op,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            expose: ExposeLocation::Plain,
            policy: ProximityPolicy::default(),
            verifier,
        }
    }

    pub fn from_config(
        op: Operator,
        storage: &StorageConfig,
        geo: &GeoConfig,
        verifier: Arc<dyn CodeVerifier>,
    ) -> Self {
        Self::new(op, storage.prefix.clone(), verifier)
            .with_expose_location(storage.expose_location)
            .with_policy(ProximityPolicy::new(geo.radius_km))
    }

    pub fn with_expose_location(mut self, expose: ExposeLocation) -> Self {
        self.expose = expose;
        self
    }

    pub fn with_policy(mut self, policy: ProximityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn record_path(&self, id: &FileId) -> String {
        format!("{}/records/{}.json", self.prefix, id)
    }

    fn blob_path(&self, id: &FileId) -> String {
        format!("{}/blobs/{}", self.prefix, id)
    }

    fn records_dir(&self) -> String {
        format!("{}/records/", self.prefix)
    }

    fn expose(&self, stored: StoredRecord) -> FileRecord {
        let location = match self.expose {
            ExposeLocation::Plain => StoredLocation::Plain(stored.location),
            ExposeLocation::Hashed => {
                StoredLocation::Hashed(geocrypt_crypto::hash_location_tag(&stored.location))
            }
        };
        FileRecord {
            id: stored.id,
            filename: stored.filename,
            mimetype: stored.mimetype,
            size: stored.size,
            location,
            owner: stored.owner,
            created_at: stored.created_at,
        }
    }

    async fn load(&self, id: &FileId) -> GeocryptResult<StoredRecord> {
        let data = self
            .op
            .read(&self.record_path(id))
            .await
            .map_err(|e| map_opendal(e, id))?;
        StoredRecord::from_bytes(id, &data.to_vec())
    }

    /// Load a record and check that `requester` owns it.
    async fn load_owned(&self, requester: &Requester, id: &FileId) -> GeocryptResult<StoredRecord> {
        authorize(requester)?;
        let record = self.load(id).await?;
        if record.owner != requester.user_id {
            warn!(file_id = %id, user = %requester.user_id, "access to foreign file refused");
            return Err(GeocryptError::Forbidden(format!("file {id}")));
        }
        Ok(record)
    }
}

fn authorize(requester: &Requester) -> GeocryptResult<()> {
    if requester.user_id.trim().is_empty() {
        return Err(GeocryptError::Forbidden("missing requester identity".into()));
    }
    if requester.credential.expose_secret().trim().is_empty() {
        return Err(GeocryptError::Forbidden("missing bearer credential".into()));
    }
    Ok(())
}

fn map_opendal(e: opendal::Error, id: &FileId) -> GeocryptError {
    match e.kind() {
        ErrorKind::NotFound => GeocryptError::NotFound(format!("file {id}")),
        ErrorKind::PermissionDenied => GeocryptError::Forbidden(format!("file {id}: {e}")),
        _ => GeocryptError::Storage(format!("file {id}: {e}")),
    }
}

#[async_trait]
impl FileStore for OpendalStore {
    async fn create_file(
        &self,
        requester: &Requester,
        upload: NewUpload,
    ) -> GeocryptResult<FileRecord> {
        authorize(requester)?;
        if upload.filename.trim().is_empty() {
            return Err(GeocryptError::Storage("filename must not be empty".into()));
        }

        let stored = StoredRecord {
            id: FileId::generate(),
            filename: upload.filename,
            mimetype: upload.mimetype,
            size: upload.ciphertext.len() as u64,
            location: upload.location,
            owner: requester.user_id.clone(),
            created_at: unix_now(),
        };
        let id = stored.id.clone();

        // blob first: a record must never point at missing ciphertext
        self.op
            .write(&self.blob_path(&id), upload.ciphertext)
            .await
            .map_err(|e| map_opendal(e, &id))?;
        self.op
            .write(&self.record_path(&id), stored.to_bytes()?)
            .await
            .map_err(|e| map_opendal(e, &id))?;

        info!(
            file_id = %id,
            owner = %stored.owner,
            size = stored.size,
            filename = %stored.filename,
            "file stored"
        );
        Ok(self.expose(stored))
    }

    async fn list_files(&self, requester: &Requester) -> GeocryptResult<Vec<FileRecord>> {
        authorize(requester)?;
        let entries = match self.op.list(&self.records_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(GeocryptError::Storage(format!("listing records: {e}"))),
        };

        let mut records = Vec::new();
        for entry in entries {
            let Some(id) = entry.name().strip_suffix(".json") else {
                continue;
            };
            let id = FileId::new(id);
            let record = match self.load(&id).await {
                Ok(r) => r,
                // deleted between list and read
                Err(GeocryptError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if record.owner == requester.user_id {
                records.push(record);
            }
        }

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        debug!(user = %requester.user_id, count = records.len(), "listed files");
        Ok(records.into_iter().map(|r| self.expose(r)).collect())
    }

    async fn get_file(&self, requester: &Requester, id: &FileId) -> GeocryptResult<FileRecord> {
        let record = self.load_owned(requester, id).await?;
        Ok(self.expose(record))
    }

    async fn get_file_blob(
        &self,
        requester: &Requester,
        id: &FileId,
        current: &LocationTag,
        code: &str,
    ) -> GeocryptResult<EncryptedBlob> {
        let record = self.load_owned(requester, id).await?;

        if !self.policy.allows(current.as_str(), record.location.as_str()) {
            warn!(file_id = %id, "blob request from outside the allowed area");
            return Err(GeocryptError::OutOfRange {
                radius_km: self.policy.radius_km,
            });
        }

        if !self.verifier.verify_code(id, code).await {
            warn!(file_id = %id, "blob request with invalid one-time code");
            return Err(GeocryptError::Forbidden(
                "invalid or expired one-time code".into(),
            ));
        }

        let data = self
            .op
            .read(&self.blob_path(id))
            .await
            .map_err(|e| map_opendal(e, id))?;
        info!(file_id = %id, size = data.len(), "ciphertext released");
        Ok(EncryptedBlob {
            file_id: id.clone(),
            ciphertext: data.to_vec(),
        })
    }

    async fn delete_file(&self, requester: &Requester, id: &FileId) -> GeocryptResult<()> {
        self.load_owned(requester, id).await?;
        self.op
            .delete(&self.blob_path(id))
            .await
            .map_err(|e| map_opendal(e, id))?;
        self.op
            .delete(&self.record_path(id))
            .await
            .map_err(|e| map_opendal(e, id))?;
        self.verifier.revoke(id).await;
        info!(file_id = %id, "file deleted");
        Ok(())
    }
}
