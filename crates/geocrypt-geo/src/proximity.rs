//! Proximity checks between location tags
//!
//! Tags are always compared through their decoded centroids and the
//! haversine distance. Two positions 10 m apart can straddle a cell border
//! and produce different strings, so string equality is never used here.

use tracing::debug;

use crate::{geohash, Coordinate, GeoError, DEFAULT_RADIUS_KM, EARTH_RADIUS_KM};

/// Great-circle distance between two coordinates in kilometres.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance between the centroids of two tags.
///
/// Unlike [`is_within_allowed_area`] this surfaces decode failures, for
/// callers that need to tell "too far" apart from "malformed tag".
pub fn distance_km(current: &str, reference: &str) -> Result<f64, GeoError> {
    let a = geohash::decode(current)?;
    let b = geohash::decode(reference)?;
    Ok(haversine_km(a, b))
}

/// Whether `current` lies within `radius_km` of `reference`.
///
/// Fails closed: an empty or undecodable tag yields `false`.
pub fn is_within_allowed_area(current: &str, reference: &str, radius_km: f64) -> bool {
    match distance_km(current, reference) {
        Ok(distance) => {
            let allowed = distance <= radius_km;
            debug!(
                current,
                reference,
                distance_km = distance,
                radius_km,
                allowed,
                "proximity check"
            );
            allowed
        }
        Err(e) => {
            debug!(current, reference, error = %e, "proximity check: undecodable tag, denying");
            false
        }
    }
}

/// A configured proximity radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityPolicy {
    pub radius_km: f64,
}

impl Default for ProximityPolicy {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_RADIUS_KM,
        }
    }
}

impl ProximityPolicy {
    pub fn new(radius_km: f64) -> Self {
        Self { radius_km }
    }

    pub fn allows(&self, current: &str, reference: &str) -> bool {
        is_within_allowed_area(current, reference, self.radius_km)
    }
}
