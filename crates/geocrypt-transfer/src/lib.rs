//! geocrypt-transfer: the client-side pipeline
//!
//! Upload: read the location sensor, derive the key from the current
//! geohash, encrypt, hand the ciphertext to storage.
//!
//! Download and share: read the sensor, refuse early when outside the
//! allowed area (no code is requested), open a one-time code session,
//! confirm it, fetch and decrypt the ciphertext.

pub mod coordinator;
pub mod location;
pub mod save;

pub use coordinator::{OtpSessionHandle, TransferCoordinator, TransferSettings};
pub use location::{current_tag, FixedSensor, LocationSensor};
pub use save::write_payload;
