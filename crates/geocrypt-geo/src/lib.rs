//! geocrypt-geo: location tags for GeoCrypt
//!
//! A location tag is a base32 geohash string. Uploads are keyed by the tag of
//! the uploader's position; downloads are gated on the great-circle distance
//! between the requester's tag and the stored one.
//!
//! ```text
//! (lat, lon) ──encode──► "u33dc0m" ──decode──► centroid of the cell
//!                                              │
//!                         haversine(centroid_a, centroid_b) <= radius_km
//! ```

pub mod geohash;
pub mod proximity;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use geohash::{cell_size_km, decode, decode_bbox, encode, BoundingBox};
pub use proximity::{distance_km, haversine_km, is_within_allowed_area, ProximityPolicy};

/// Geohash precision used for every upload (7 chars: cells ~153 m wide,
/// so a cell centre is off by at most ~76 m along each axis)
pub const DEFAULT_PRECISION: usize = 7;

/// Longest tag accepted by the codec (60 bits, ~3.7 cm cells)
pub const MAX_PRECISION: usize = 12;

/// Allowed distance between requester and upload location
pub const DEFAULT_RADIUS_KM: f64 = 0.1;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// The 32-symbol geohash alphabet (no `a`, `i`, `l`, `o`)
pub const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("invalid location tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject NaN and out-of-range values before they reach the codec.
    pub fn validate(&self) -> Result<(), GeoError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(GeoError::InvalidCoordinate(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(GeoError::InvalidCoordinate(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// A validated geohash string, normalized to lowercase.
///
/// Immutable once produced. Serializes as the bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationTag(String);

impl LocationTag {
    /// Parse and validate a tag. Uppercase input is accepted and lowercased.
    pub fn parse(tag: &str) -> Result<Self, GeoError> {
        if tag.is_empty() {
            return Err(GeoError::InvalidTag {
                tag: String::new(),
                reason: "empty".into(),
            });
        }
        if tag.len() > MAX_PRECISION {
            return Err(GeoError::InvalidTag {
                tag: tag.to_string(),
                reason: format!("longer than {MAX_PRECISION} characters"),
            });
        }
        let normalized = tag.to_ascii_lowercase();
        if let Some(bad) = normalized.bytes().find(|b| !ALPHABET.contains(b)) {
            return Err(GeoError::InvalidTag {
                tag: tag.to_string(),
                reason: format!("character {:?} is not in the geohash alphabet", bad as char),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of characters (the geohash precision)
    pub fn precision(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for LocationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for LocationTag {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LocationTag {
    type Error = GeoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LocationTag> for String {
    fn from(tag: LocationTag) -> Self {
        tag.0
    }
}

impl AsRef<str> for LocationTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
