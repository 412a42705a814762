//! Transfer coordinator: upload, gated download, share
//!
//! One coordinator serves one requester. It holds at most one live
//! one-time code session per file; opening a new one for the same file
//! cancels the previous session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use geocrypt_core::config::{GeocryptConfig, KeySource};
use geocrypt_core::types::{FileId, FileRecord, NewUpload, Requester, SharePayload, StoredLocation};
use geocrypt_core::{GeocryptError, GeocryptResult};
use geocrypt_crypto::{derive_key, hash_location_tag, transform, transform_in_place, SymmetricKey};
use geocrypt_geo::{LocationTag, ProximityPolicy};
use geocrypt_otp::{validate_candidate, OtpDelivery, OtpSession, OtpState, SessionTiming};
use geocrypt_storage::FileStore;

use crate::location::{current_tag, LocationSensor};

/// Tunables the coordinator needs from the config file
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub precision: usize,
    pub policy: ProximityPolicy,
    pub timing: SessionTiming,
    pub key_source: KeySource,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            precision: geocrypt_geo::DEFAULT_PRECISION,
            policy: ProximityPolicy::default(),
            timing: SessionTiming::default(),
            key_source: KeySource::default(),
        }
    }
}

impl From<&GeocryptConfig> for TransferSettings {
    fn from(cfg: &GeocryptConfig) -> Self {
        Self {
            precision: cfg.geo.precision,
            policy: ProximityPolicy::new(cfg.geo.radius_km),
            timing: SessionTiming::from(&cfg.otp),
            key_source: cfg.crypto.key_source,
        }
    }
}

/// A pending download: the file's record plus its one-time code session.
#[derive(Debug, Clone)]
pub struct OtpSessionHandle {
    record: Arc<FileRecord>,
    session: Arc<OtpSession>,
    /// Set when the key comes from the stored tag rather than the live one
    stored_key: Option<Arc<SymmetricKey>>,
}

impl OtpSessionHandle {
    pub fn file_id(&self) -> &FileId {
        &self.record.id
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn state(&self) -> OtpState {
        self.session.state()
    }

    pub fn issued_at(&self) -> u64 {
        self.session.issued_at()
    }

    pub fn remaining(&self) -> Duration {
        self.session.remaining()
    }

    /// Remaining whole seconds, updated once per tick
    pub fn countdown(&self) -> watch::Receiver<u64> {
        self.session.countdown()
    }

    pub fn timer_running(&self) -> bool {
        self.session.timer_running()
    }

    fn same_session(&self, other: &OtpSessionHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

pub struct TransferCoordinator {
    store: Arc<dyn FileStore>,
    sensor: Arc<dyn LocationSensor>,
    delivery: Arc<dyn OtpDelivery>,
    requester: Requester,
    settings: TransferSettings,
    sessions: Mutex<HashMap<FileId, OtpSessionHandle>>,
}

impl TransferCoordinator {
    pub fn new(
        store: Arc<dyn FileStore>,
        sensor: Arc<dyn LocationSensor>,
        delivery: Arc<dyn OtpDelivery>,
        requester: Requester,
        settings: TransferSettings,
    ) -> Self {
        Self {
            store,
            sensor,
            delivery,
            requester,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Encrypt `bytes` with a key bound to the current location and store them.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mimetype: &str,
    ) -> GeocryptResult<FileRecord> {
        let tag = current_tag(self.sensor.as_ref(), self.settings.precision).await?;
        let key = derive_key(&tag);

        let mut ciphertext = bytes;
        transform_in_place(&mut ciphertext, &key);

        let size = ciphertext.len();
        let record = self
            .store
            .create_file(
                &self.requester,
                NewUpload {
                    filename: filename.to_string(),
                    mimetype: mimetype.to_string(),
                    ciphertext,
                    location: tag,
                },
            )
            .await?;

        info!(file_id = %record.id, filename, size, "uploaded");
        Ok(record)
    }

    /// Check the requester is close enough to `file_id`'s upload location and
    /// open a one-time code session for it.
    ///
    /// Fails with `OutOfRange` before any code is requested when the
    /// requester is too far away, or with `Config` when the configured key
    /// source cannot be served for this record. A delivery failure cancels
    /// the session and is returned as `DeliveryFailed`.
    pub async fn begin_download(&self, file_id: &FileId) -> GeocryptResult<OtpSessionHandle> {
        let tag = current_tag(self.sensor.as_ref(), self.settings.precision).await?;
        let record = self.store.get_file(&self.requester, file_id).await?;
        self.check_proximity(&tag, &record)?;
        let stored_key = self.stored_key(&record)?.map(Arc::new);

        if let Some(previous) = self.sessions().remove(file_id) {
            debug!(file_id = %file_id, "replacing pending one-time code session");
            previous.session.cancel();
        }

        let handle = OtpSessionHandle {
            record: Arc::new(record),
            session: Arc::new(OtpSession::open(file_id.clone(), self.settings.timing)),
            stored_key,
        };

        if let Err(e) = self.delivery.request_code(file_id).await {
            let reason = match e {
                GeocryptError::DeliveryFailed(reason) => reason,
                other => other.to_string(),
            };
            warn!(file_id = %file_id, %reason, "one-time code request failed");
            return Err(handle
                .session
                .mark_delivery_failed(&reason)
                .err()
                .unwrap_or(GeocryptError::DeliveryFailed(reason)));
        }
        handle.session.mark_dispatched()?;

        self.sessions().insert(file_id.clone(), handle.clone());
        info!(file_id = %file_id, "download gated on one-time code");
        Ok(handle)
    }

    /// Submit the one-time code for `handle` and return the plaintext.
    ///
    /// A malformed code is rejected without touching the sensor, storage or
    /// the session. Otherwise the session is consumed before the ciphertext
    /// is requested, so a code is never submitted twice.
    pub async fn confirm_otp(
        &self,
        handle: &OtpSessionHandle,
        candidate: &str,
    ) -> GeocryptResult<Vec<u8>> {
        validate_candidate(candidate)?;
        let file_id = handle.file_id();

        let confirmed = handle.session.confirm(candidate);
        if !handle.session.is_active() {
            self.forget(handle);
        }
        confirmed?;

        let tag = current_tag(self.sensor.as_ref(), self.settings.precision).await?;
        let blob = self
            .store
            .get_file_blob(&self.requester, file_id, &tag, candidate)
            .await?;

        let actual = blob.ciphertext.len() as u64;
        if actual != handle.record().size {
            warn!(file_id = %file_id, expected = handle.record().size, actual, "ciphertext size mismatch");
            return Err(GeocryptError::DecryptionMismatch {
                expected: handle.record().size,
                actual,
            });
        }

        let plaintext = match &handle.stored_key {
            Some(key) => transform(&blob.ciphertext, key),
            None => transform(&blob.ciphertext, &derive_key(&tag)),
        };
        info!(file_id = %file_id, bytes = plaintext.len(), "download decrypted");
        Ok(plaintext)
    }

    /// Close the gate for `handle`. Idempotent.
    pub fn cancel_otp(&self, handle: &OtpSessionHandle) {
        handle.session.cancel();
        self.forget(handle);
    }

    /// Confirm the session most recently opened for `file_id` and return
    /// the decrypted file ready for hand-off.
    pub async fn share(&self, file_id: &FileId, candidate: &str) -> GeocryptResult<SharePayload> {
        let handle = self
            .active_session(file_id)
            .ok_or_else(|| GeocryptError::NoActiveSession(file_id.clone()))?;
        let bytes = self.confirm_otp(&handle, candidate).await?;
        Ok(SharePayload {
            filename: handle.record().filename.clone(),
            mimetype: handle.record().mimetype.clone(),
            bytes,
        })
    }

    /// Confirm `handle` and write the plaintext into `dir`.
    pub async fn save_to(
        &self,
        handle: &OtpSessionHandle,
        candidate: &str,
        dir: &Path,
    ) -> GeocryptResult<PathBuf> {
        let bytes = self.confirm_otp(handle, candidate).await?;
        let payload = SharePayload {
            filename: handle.record().filename.clone(),
            mimetype: handle.record().mimetype.clone(),
            bytes,
        };
        crate::save::write_payload(dir, &payload).await
    }

    pub fn active_session(&self, file_id: &FileId) -> Option<OtpSessionHandle> {
        self.sessions().get(file_id).cloned()
    }

    pub async fn list_files(&self) -> GeocryptResult<Vec<FileRecord>> {
        self.store.list_files(&self.requester).await
    }

    pub async fn get_file(&self, file_id: &FileId) -> GeocryptResult<FileRecord> {
        self.store.get_file(&self.requester, file_id).await
    }

    pub async fn delete(&self, file_id: &FileId) -> GeocryptResult<()> {
        if let Some(pending) = self.sessions().remove(file_id) {
            pending.session.cancel();
        }
        self.store.delete_file(&self.requester, file_id).await
    }

    fn check_proximity(&self, current: &LocationTag, record: &FileRecord) -> GeocryptResult<()> {
        let allowed = match &record.location {
            StoredLocation::Plain(stored) => {
                self.settings.policy.allows(current.as_str(), stored.as_str())
            }
            // only the hash is known: degrade to same-cell equality
            StoredLocation::Hashed(hash) => hash_location_tag(current) == *hash,
        };
        if allowed {
            return Ok(());
        }

        if let StoredLocation::Plain(stored) = &record.location {
            if let Ok(d) = geocrypt_geo::distance_km(current.as_str(), stored.as_str()) {
                warn!(file_id = %record.id, distance_km = d, "requester outside the allowed area");
            }
        } else {
            warn!(file_id = %record.id, "requester not in the upload cell");
        }
        Err(GeocryptError::OutOfRange {
            radius_km: self.settings.policy.radius_km,
        })
    }

    /// Key from the stored tag when so configured, else `None` (use the
    /// requester's live tag).
    fn stored_key(&self, record: &FileRecord) -> GeocryptResult<Option<SymmetricKey>> {
        match (self.settings.key_source, &record.location) {
            (KeySource::RequesterTag, _) => Ok(None),
            (KeySource::StoredTag, StoredLocation::Plain(tag)) => Ok(Some(derive_key(tag))),
            (KeySource::StoredTag, StoredLocation::Hashed(_)) => Err(GeocryptError::Config(
                "crypto.key_source = \"stored_tag\" but storage only exposes a hashed location"
                    .into(),
            )),
        }
    }

    fn forget(&self, handle: &OtpSessionHandle) {
        let mut sessions = self.sessions();
        if sessions
            .get(handle.file_id())
            .is_some_and(|current| current.same_session(handle))
        {
            sessions.remove(handle.file_id());
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<FileId, OtpSessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
