use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{GeocryptError, GeocryptResult};

/// Top-level configuration (loaded from geocrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocryptConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub geo: GeoConfig,
    pub otp: OtpConfig,
    pub crypto: CryptoConfig,
}

impl GeocryptConfig {
    /// Reject values the transfer pipeline cannot work with.
    pub fn validate(&self) -> GeocryptResult<()> {
        if self.geo.precision == 0 || self.geo.precision > geocrypt_geo::MAX_PRECISION {
            return Err(GeocryptError::Config(format!(
                "geo.precision must be between 1 and {}, got {}",
                geocrypt_geo::MAX_PRECISION,
                self.geo.precision
            )));
        }
        if !self.geo.radius_km.is_finite() || self.geo.radius_km <= 0.0 {
            return Err(GeocryptError::Config(format!(
                "geo.radius_km must be a positive number, got {}",
                self.geo.radius_km
            )));
        }
        if self.otp.validity_secs == 0 {
            return Err(GeocryptError::Config("otp.validity_secs must be > 0".into()));
        }
        if self.otp.tick_millis == 0 {
            return Err(GeocryptError::Config("otp.tick_millis must be > 0".into()));
        }
        if self.crypto.key_source == KeySource::StoredTag
            && self.storage.expose_location == ExposeLocation::Hashed
        {
            return Err(GeocryptError::Config(
                "crypto.key_source = \"stored_tag\" needs storage.expose_location = \"plain\"".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Local directory (development)
    Fs,
    /// S3-compatible object store
    S3,
    /// In-process memory (tests, demos)
    Memory,
}

/// How a file's upload location is exposed in records returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposeLocation {
    Plain,
    Hashed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix for records and blobs
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    pub expose_location: ExposeLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Geohash length used for uploads (default: 7)
    pub precision: usize,
    /// Allowed distance from the upload location in km (default: 0.1)
    pub radius_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Code lifetime in seconds (default: 90)
    pub validity_secs: u64,
    /// Countdown tick interval in milliseconds (default: 1000)
    pub tick_millis: u64,
}

/// Which tag the download key is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// The requester's live tag. Decrypts only when it names the upload cell.
    #[default]
    RequesterTag,
    /// The plain tag stored with the file record.
    StoredTag,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub key_source: KeySource,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("~/.local/share/geocrypt/store"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "geocrypt".into(),
            prefix: "geocrypt".into(),
            enforce_tls: false,
            expose_location: ExposeLocation::Plain,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            precision: geocrypt_geo::DEFAULT_PRECISION,
            radius_km: geocrypt_geo::DEFAULT_RADIUS_KM,
        }
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            validity_secs: 90,
            tick_millis: 1000,
        }
    }
}
