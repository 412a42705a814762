//! Location sensor seam
//!
//! The platform sensor is an external collaborator. The coordinator never
//! caches a position: every transfer reads the sensor afresh and passes the
//! resulting tag along explicitly.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use geocrypt_core::{GeocryptError, GeocryptResult};
use geocrypt_geo::{Coordinate, LocationTag};

#[async_trait]
pub trait LocationSensor: Send + Sync {
    /// Current position.
    ///
    /// Fails with `PermissionDenied` when the user refused location access
    /// and `LocationUnavailable` when no fix could be obtained.
    async fn current_coordinate(&self) -> GeocryptResult<Coordinate>;
}

#[derive(Debug, Clone)]
enum Reading {
    Fix(Coordinate),
    Denied,
    Unavailable(String),
}

/// A sensor that reports a position set by the caller (CLI flags, tests).
#[derive(Debug)]
pub struct FixedSensor {
    reading: Mutex<Reading>,
}

impl FixedSensor {
    pub fn new(coord: Coordinate) -> Self {
        Self {
            reading: Mutex::new(Reading::Fix(coord)),
        }
    }

    /// A sensor whose permission was refused
    pub fn denied() -> Self {
        Self {
            reading: Mutex::new(Reading::Denied),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            reading: Mutex::new(Reading::Unavailable(reason.into())),
        }
    }

    pub fn move_to(&self, coord: Coordinate) {
        *self.reading.lock().unwrap_or_else(|e| e.into_inner()) = Reading::Fix(coord);
    }
}

#[async_trait]
impl LocationSensor for FixedSensor {
    async fn current_coordinate(&self) -> GeocryptResult<Coordinate> {
        let reading = self.reading.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match reading {
            Reading::Fix(coord) => Ok(coord),
            Reading::Denied => Err(GeocryptError::PermissionDenied("location access".into())),
            Reading::Unavailable(reason) => Err(GeocryptError::LocationUnavailable(reason)),
        }
    }
}

/// Read the sensor and encode the position at `precision`.
///
/// Any sensor failure, including a refused permission or an out-of-range
/// reading, surfaces as `LocationUnavailable`.
pub async fn current_tag(
    sensor: &dyn LocationSensor,
    precision: usize,
) -> GeocryptResult<LocationTag> {
    let coord = sensor.current_coordinate().await.map_err(|e| match e {
        GeocryptError::LocationUnavailable(_) => e,
        GeocryptError::PermissionDenied(_) => {
            GeocryptError::LocationUnavailable("location permission denied".into())
        }
        other => GeocryptError::LocationUnavailable(other.to_string()),
    })?;
    let tag = geocrypt_geo::encode(coord, precision)
        .map_err(|e| GeocryptError::LocationUnavailable(e.to_string()))?;
    debug!(%tag, "location acquired");
    Ok(tag)
}
