use thiserror::Error;

use geocrypt_geo::GeoError;

use crate::types::FileId;

pub type GeocryptResult<T> = Result<T, GeocryptError>;

#[derive(Debug, Error)]
pub enum GeocryptError {
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("invalid location tag: {0}")]
    InvalidTag(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("you must be within {radius_km} km of where this file was uploaded to access it")]
    OutOfRange { radius_km: f64 },

    #[error("the one-time code has expired, request a new one")]
    OtpExpired,

    #[error("the one-time code must be exactly {expected} digits")]
    OtpInvalidFormat { expected: usize },

    #[error("the one-time code request was cancelled")]
    OtpCancelled,

    #[error("the one-time code was already used, request a new one")]
    OtpConsumed,

    #[error("no pending one-time code for file {0}")]
    NoActiveSession(FileId),

    #[error("could not deliver the one-time code: {0}")]
    DeliveryFailed(String),

    #[error("decrypted payload is {actual} bytes but the file record says {expected}")]
    DecryptionMismatch { expected: u64, actual: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<GeoError> for GeocryptError {
    fn from(e: GeoError) -> Self {
        match e {
            GeoError::InvalidTag { .. } => GeocryptError::InvalidTag(e.to_string()),
            GeoError::InvalidCoordinate(msg) => GeocryptError::InvalidCoordinate(msg),
        }
    }
}

impl GeocryptError {
    /// Whether the failure came from the one-time code gate (as opposed to
    /// location, storage or local I/O).
    pub fn is_otp_failure(&self) -> bool {
        matches!(
            self,
            GeocryptError::OtpExpired
                | GeocryptError::OtpInvalidFormat { .. }
                | GeocryptError::OtpCancelled
                | GeocryptError::OtpConsumed
                | GeocryptError::NoActiveSession(_)
                | GeocryptError::DeliveryFailed(_)
        )
    }
}
