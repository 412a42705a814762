//! Integration test: location-keyed upload → OTP-gated download
//!
//! Drives the coordinator against OpenDAL's in-memory backend with the
//! in-process code issuer, so codes travel over a channel instead of email.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opendal::Operator;
use tokio::sync::mpsc::UnboundedReceiver;

use geocrypt_core::config::{ExposeLocation, KeySource};
use geocrypt_core::types::{EncryptedBlob, FileId, FileRecord, NewUpload, Requester, StoredLocation};
use geocrypt_core::{GeocryptError, GeocryptResult};
use geocrypt_geo::{Coordinate, LocationTag};
use geocrypt_otp::{ChannelSink, OtpDelivery, OtpIssuer, OtpState};
use geocrypt_storage::{FileStore, OpendalStore};
use geocrypt_transfer::{FixedSensor, LocationSensor, TransferCoordinator, TransferSettings};

/// Centre of u33dc0m (Berlin, Alexanderplatz)
const HOME: Coordinate = Coordinate {
    latitude: 52.5167,
    longitude: 13.4109,
};
/// In u33dc0q, one cell east of HOME (~93 m between cell centres)
const NEXT_DOOR: Coordinate = Coordinate {
    latitude: 52.5167,
    longitude: 13.4125,
};
/// ~5 km north of HOME
const FAR_AWAY: Coordinate = Coordinate {
    latitude: 52.5617,
    longitude: 13.4109,
};

struct Harness {
    op: Operator,
    sensor: Arc<FixedSensor>,
    issuer: Arc<OtpIssuer>,
    codes: UnboundedReceiver<(FileId, String)>,
    coordinator: TransferCoordinator,
}

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn harness_with(expose: ExposeLocation, key_source: KeySource) -> Harness {
    let op = memory_operator();
    let (sink, codes) = ChannelSink::new();
    let issuer = Arc::new(OtpIssuer::new(Arc::new(sink)));
    let store = OpendalStore::new(op.clone(), "test", issuer.clone()).with_expose_location(expose);
    let sensor = Arc::new(FixedSensor::new(HOME));
    let settings = TransferSettings {
        key_source,
        ..Default::default()
    };
    let coordinator = TransferCoordinator::new(
        Arc::new(store),
        sensor.clone(),
        issuer.clone(),
        Requester::new("alice", "bearer-token"),
        settings,
    );
    Harness {
        op,
        sensor,
        issuer,
        codes,
        coordinator,
    }
}

fn harness() -> Harness {
    harness_with(ExposeLocation::Plain, KeySource::RequesterTag)
}

async fn next_code(h: &mut Harness) -> String {
    h.codes.recv().await.expect("a code should have been sent").1
}

#[tokio::test]
async fn hello_roundtrip_same_cell() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    assert_eq!(record.size, 5);
    assert_eq!(
        record.location,
        StoredLocation::Plain(LocationTag::parse("u33dc0m").unwrap())
    );

    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    assert_eq!(handle.state(), OtpState::AwaitingInput);
    assert!(handle.timer_running());

    let code = next_code(&mut h).await;
    let plaintext = h.coordinator.confirm_otp(&handle, &code).await.unwrap();
    assert_eq!(plaintext, b"hello");
    assert_eq!(handle.state(), OtpState::Consumed);
    assert!(!handle.timer_running());
    assert!(h.coordinator.active_session(&record.id).is_none());
}

#[tokio::test]
async fn stored_blob_is_not_plaintext() {
    let h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let blob = h
        .op
        .read(&format!("test/blobs/{}", record.id))
        .await
        .unwrap()
        .to_vec();
    // key for u33dc0m starts with "ef1f"
    assert_eq!(blob, vec![b'h' ^ b'e', b'e' ^ b'f', b'l' ^ b'1', b'l' ^ b'f', b'o' ^ b'e']);
}

#[tokio::test]
async fn far_away_is_refused_before_any_code() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();

    h.sensor.move_to(FAR_AWAY);
    let err = h.coordinator.begin_download(&record.id).await.unwrap_err();
    assert!(matches!(err, GeocryptError::OutOfRange { radius_km } if radius_km == 0.1));
    assert!(h.codes.try_recv().is_err(), "no code may be requested");
    assert_eq!(h.issuer.pending().await, 0);
    assert!(h.coordinator.active_session(&record.id).is_none());
}

#[tokio::test]
async fn neighbouring_cell_passes_but_requester_key_differs() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();

    h.sensor.move_to(NEXT_DOOR);
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;
    let bytes = h.coordinator.confirm_otp(&handle, &code).await.unwrap();
    assert_eq!(bytes.len(), 5);
    assert_ne!(bytes, b"hello", "key comes from the requester's own cell");
}

#[tokio::test]
async fn stored_tag_key_source_decrypts_from_next_door() {
    let mut h = harness_with(ExposeLocation::Plain, KeySource::StoredTag);
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();

    h.sensor.move_to(NEXT_DOOR);
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;
    let bytes = h.coordinator.confirm_otp(&handle, &code).await.unwrap();
    assert_eq!(bytes, b"hello");
}

#[tokio::test]
async fn same_plaintext_different_places_different_ciphertext() {
    let h = harness();
    let a = h
        .coordinator
        .upload(b"hello".to_vec(), "a.txt", "text/plain")
        .await
        .unwrap();
    h.sensor.move_to(FAR_AWAY);
    let b = h
        .coordinator
        .upload(b"hello".to_vec(), "b.txt", "text/plain")
        .await
        .unwrap();

    let blob_a = h.op.read(&format!("test/blobs/{}", a.id)).await.unwrap().to_vec();
    let blob_b = h.op.read(&format!("test/blobs/{}", b.id)).await.unwrap().to_vec();
    assert_ne!(blob_a, blob_b);
}

#[tokio::test(start_paused = true)]
async fn code_expires_after_ninety_seconds() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;

    tokio::time::sleep(Duration::from_secs(91)).await;
    assert_eq!(handle.state(), OtpState::Expired);
    assert!(!handle.timer_running());

    let err = h.coordinator.confirm_otp(&handle, &code).await.unwrap_err();
    assert!(matches!(err, GeocryptError::OtpExpired));
    assert!(h.coordinator.active_session(&record.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn countdown_is_observable() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let _ = next_code(&mut h).await;

    let countdown = handle.countdown();
    assert_eq!(*countdown.borrow(), 90);
    tokio::time::sleep(Duration::from_millis(30_500)).await;
    assert_eq!(*countdown.borrow(), 60);
    h.coordinator.cancel_otp(&handle);
}

/// Sensor wrapper that counts reads
struct CountingSensor {
    inner: FixedSensor,
    reads: AtomicUsize,
}

#[async_trait]
impl LocationSensor for CountingSensor {
    async fn current_coordinate(&self) -> GeocryptResult<Coordinate> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.current_coordinate().await
    }
}

#[tokio::test]
async fn malformed_code_touches_nothing() {
    let op = memory_operator();
    let (sink, mut codes) = ChannelSink::new();
    let issuer = Arc::new(OtpIssuer::new(Arc::new(sink)));
    let store = OpendalStore::new(op, "test", issuer.clone());
    let sensor = Arc::new(CountingSensor {
        inner: FixedSensor::new(HOME),
        reads: AtomicUsize::new(0),
    });
    let coordinator = TransferCoordinator::new(
        Arc::new(store),
        sensor.clone(),
        issuer.clone(),
        Requester::new("alice", "t"),
        TransferSettings::default(),
    );

    let record = coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let handle = coordinator.begin_download(&record.id).await.unwrap();
    let (_, code) = codes.recv().await.unwrap();
    let reads_before = sensor.reads.load(Ordering::SeqCst);

    for bad in ["12345", "1234567", "12a456", ""] {
        let err = coordinator.confirm_otp(&handle, bad).await.unwrap_err();
        assert!(matches!(err, GeocryptError::OtpInvalidFormat { expected: 6 }));
    }
    assert_eq!(sensor.reads.load(Ordering::SeqCst), reads_before);
    assert_eq!(handle.state(), OtpState::AwaitingInput);
    assert_eq!(issuer.pending().await, 1, "issued code untouched");

    assert_eq!(coordinator.confirm_otp(&handle, &code).await.unwrap(), b"hello");
}

struct FailingDelivery;

#[async_trait]
impl OtpDelivery for FailingDelivery {
    async fn request_code(&self, _file_id: &FileId) -> GeocryptResult<()> {
        Err(GeocryptError::Network("smtp relay unreachable".into()))
    }
}

#[tokio::test]
async fn delivery_failure_aborts_without_session() {
    let op = memory_operator();
    let (sink, _codes) = ChannelSink::new();
    let issuer = Arc::new(OtpIssuer::new(Arc::new(sink)));
    let store = OpendalStore::new(op, "test", issuer);
    let coordinator = TransferCoordinator::new(
        Arc::new(store),
        Arc::new(FixedSensor::new(HOME)),
        Arc::new(FailingDelivery),
        Requester::new("alice", "t"),
        TransferSettings::default(),
    );

    let record = coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let err = coordinator.begin_download(&record.id).await.unwrap_err();
    assert!(matches!(err, GeocryptError::DeliveryFailed(ref m) if m.contains("unreachable")));
    assert!(coordinator.active_session(&record.id).is_none());
    assert!(matches!(
        coordinator.share(&record.id, "123456").await,
        Err(GeocryptError::NoActiveSession(_))
    ));
}

#[tokio::test]
async fn share_confirms_latest_session() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();

    let first = h.coordinator.begin_download(&record.id).await.unwrap();
    let _stale = next_code(&mut h).await;
    let _second = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;
    assert_eq!(first.state(), OtpState::Cancelled, "reopening cancels the previous session");

    let payload = h.coordinator.share(&record.id, &code).await.unwrap();
    assert_eq!(payload.filename, "hello.txt");
    assert_eq!(payload.mimetype, "text/plain");
    assert_eq!(payload.bytes, b"hello");

    assert!(matches!(
        h.coordinator.share(&record.id, &code).await,
        Err(GeocryptError::NoActiveSession(_))
    ));
}

#[tokio::test]
async fn cancelled_session_refuses_code() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;

    h.coordinator.cancel_otp(&handle);
    h.coordinator.cancel_otp(&handle);
    assert!(!handle.timer_running());
    let err = h.coordinator.confirm_otp(&handle, &code).await.unwrap_err();
    assert!(matches!(err, GeocryptError::OtpCancelled));
}

#[tokio::test]
async fn consumed_session_is_single_use() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;

    h.coordinator.confirm_otp(&handle, &code).await.unwrap();
    let err = h.coordinator.confirm_otp(&handle, &code).await.unwrap_err();
    assert!(matches!(err, GeocryptError::OtpConsumed));
}

#[tokio::test]
async fn hashed_location_degrades_to_same_cell() {
    let mut h = harness_with(ExposeLocation::Hashed, KeySource::RequesterTag);
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    assert!(matches!(record.location, StoredLocation::Hashed(_)));

    h.sensor.move_to(NEXT_DOOR);
    let err = h.coordinator.begin_download(&record.id).await.unwrap_err();
    assert!(matches!(err, GeocryptError::OutOfRange { .. }));

    h.sensor.move_to(HOME);
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;
    assert_eq!(h.coordinator.confirm_otp(&handle, &code).await.unwrap(), b"hello");
}

#[tokio::test]
async fn stored_tag_with_hashed_location_is_refused_before_any_code() {
    let mut h = harness_with(ExposeLocation::Hashed, KeySource::StoredTag);
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();

    let err = h.coordinator.begin_download(&record.id).await.unwrap_err();
    assert!(matches!(err, GeocryptError::Config(_)));
    assert!(h.codes.try_recv().is_err(), "no code may be sent");
    assert_eq!(h.issuer.pending().await, 0);
    assert!(h.coordinator.active_session(&record.id).is_none());
}

#[tokio::test]
async fn sensor_denied_blocks_upload() {
    let op = memory_operator();
    let (sink, _codes) = ChannelSink::new();
    let issuer = Arc::new(OtpIssuer::new(Arc::new(sink)));
    let coordinator = TransferCoordinator::new(
        Arc::new(OpendalStore::new(op, "test", issuer.clone())),
        Arc::new(FixedSensor::denied()),
        issuer,
        Requester::new("alice", "t"),
        TransferSettings::default(),
    );
    let err = coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, GeocryptError::LocationUnavailable(_)));
}

#[tokio::test]
async fn list_get_delete_passthrough() {
    let h = harness();
    let a = h
        .coordinator
        .upload(b"one".to_vec(), "one.txt", "text/plain")
        .await
        .unwrap();
    let b = h
        .coordinator
        .upload(b"two".to_vec(), "two.txt", "text/plain")
        .await
        .unwrap();

    assert_eq!(h.coordinator.list_files().await.unwrap().len(), 2);
    assert_eq!(h.coordinator.get_file(&a.id).await.unwrap().filename, "one.txt");

    h.coordinator.delete(&a.id).await.unwrap();
    let remaining = h.coordinator.list_files().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b.id);
    assert!(matches!(
        h.coordinator.get_file(&a.id).await,
        Err(GeocryptError::NotFound(_))
    ));
}

#[tokio::test]
async fn save_to_writes_plaintext() {
    let mut h = harness();
    let record = h
        .coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let handle = h.coordinator.begin_download(&record.id).await.unwrap();
    let code = next_code(&mut h).await;

    let tmp = tempfile::TempDir::new().unwrap();
    let path = h
        .coordinator
        .save_to(&handle, &code, tmp.path())
        .await
        .unwrap();
    assert_eq!(path, tmp.path().join("hello.txt"));
    assert_eq!(std::fs::read(path).unwrap(), b"hello");
}

/// Store that truncates every blob it releases
struct TruncatingStore {
    inner: OpendalStore,
}

#[async_trait]
impl FileStore for TruncatingStore {
    async fn create_file(&self, r: &Requester, u: NewUpload) -> GeocryptResult<FileRecord> {
        self.inner.create_file(r, u).await
    }

    async fn list_files(&self, r: &Requester) -> GeocryptResult<Vec<FileRecord>> {
        self.inner.list_files(r).await
    }

    async fn get_file(&self, r: &Requester, id: &FileId) -> GeocryptResult<FileRecord> {
        self.inner.get_file(r, id).await
    }

    async fn get_file_blob(
        &self,
        r: &Requester,
        id: &FileId,
        current: &LocationTag,
        code: &str,
    ) -> GeocryptResult<EncryptedBlob> {
        let mut blob = self.inner.get_file_blob(r, id, current, code).await?;
        blob.ciphertext.pop();
        Ok(blob)
    }

    async fn delete_file(&self, r: &Requester, id: &FileId) -> GeocryptResult<()> {
        self.inner.delete_file(r, id).await
    }
}

#[tokio::test]
async fn short_blob_is_a_decryption_mismatch() {
    let op = memory_operator();
    let (sink, mut codes) = ChannelSink::new();
    let issuer = Arc::new(OtpIssuer::new(Arc::new(sink)));
    let store = TruncatingStore {
        inner: OpendalStore::new(op, "test", issuer.clone()),
    };
    let coordinator = TransferCoordinator::new(
        Arc::new(store),
        Arc::new(FixedSensor::new(HOME)),
        issuer,
        Requester::new("alice", "t"),
        TransferSettings::default(),
    );

    let record = coordinator
        .upload(b"hello".to_vec(), "hello.txt", "text/plain")
        .await
        .unwrap();
    let handle = coordinator.begin_download(&record.id).await.unwrap();
    let (_, code) = codes.recv().await.unwrap();

    let err = coordinator.confirm_otp(&handle, &code).await.unwrap_err();
    assert!(matches!(
        err,
        GeocryptError::DecryptionMismatch {
            expected: 5,
            actual: 4
        }
    ));
}
