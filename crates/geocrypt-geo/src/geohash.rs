//! Base32 geohash codec
//!
//! Bits alternate longitude/latitude starting with longitude; every 5 bits
//! select one character of [`ALPHABET`]. A coordinate exactly on a split
//! point goes to the lower half, so tags match those produced by the mobile
//! client that created the existing blobs.

use crate::{Coordinate, GeoError, LocationTag, ALPHABET, EARTH_RADIUS_KM, MAX_PRECISION};

/// Bounds of a geohash cell in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn centroid(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Half the cell height in degrees (max latitude error of the centroid)
    pub fn lat_error(&self) -> f64 {
        (self.max_lat - self.min_lat) / 2.0
    }

    /// Half the cell width in degrees (max longitude error of the centroid)
    pub fn lon_error(&self) -> f64 {
        (self.max_lon - self.min_lon) / 2.0
    }

    pub fn contains(&self, coord: &Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&coord.latitude)
            && (self.min_lon..=self.max_lon).contains(&coord.longitude)
    }
}

/// Encode a coordinate as a geohash of `precision` characters.
pub fn encode(coord: Coordinate, precision: usize) -> Result<LocationTag, GeoError> {
    coord.validate()?;
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeoError::InvalidCoordinate(format!(
            "precision {precision} outside 1..={MAX_PRECISION}"
        )));
    }

    let (mut min_lat, mut max_lat) = (-90.0_f64, 90.0_f64);
    let (mut min_lon, mut max_lon) = (-180.0_f64, 180.0_f64);

    let mut tag = String::with_capacity(precision);
    let mut index = 0usize;
    let mut bit = 0u8;
    let mut lon_turn = true;

    while tag.len() < precision {
        if lon_turn {
            let mid = (min_lon + max_lon) / 2.0;
            if coord.longitude > mid {
                index = (index << 1) | 1;
                min_lon = mid;
            } else {
                index <<= 1;
                max_lon = mid;
            }
        } else {
            let mid = (min_lat + max_lat) / 2.0;
            if coord.latitude > mid {
                index = (index << 1) | 1;
                min_lat = mid;
            } else {
                index <<= 1;
                max_lat = mid;
            }
        }
        lon_turn = !lon_turn;

        bit += 1;
        if bit == 5 {
            tag.push(ALPHABET[index] as char);
            index = 0;
            bit = 0;
        }
    }

    Ok(LocationTag(tag))
}

/// Decode a tag to the bounds of its cell.
pub fn decode_bbox(tag: &str) -> Result<BoundingBox, GeoError> {
    let tag = LocationTag::parse(tag)?;

    let mut bbox = BoundingBox {
        min_lat: -90.0,
        max_lat: 90.0,
        min_lon: -180.0,
        max_lon: 180.0,
    };
    let mut lon_turn = true;

    for ch in tag.as_str().bytes() {
        // parse() guarantees membership
        let value = ALPHABET.iter().position(|&a| a == ch).unwrap_or_default();
        for shift in (0..5).rev() {
            let set = (value >> shift) & 1 == 1;
            if lon_turn {
                let mid = (bbox.min_lon + bbox.max_lon) / 2.0;
                if set {
                    bbox.min_lon = mid;
                } else {
                    bbox.max_lon = mid;
                }
            } else {
                let mid = (bbox.min_lat + bbox.max_lat) / 2.0;
                if set {
                    bbox.min_lat = mid;
                } else {
                    bbox.max_lat = mid;
                }
            }
            lon_turn = !lon_turn;
        }
    }

    Ok(bbox)
}

/// Decode a tag to the centroid of its cell.
///
/// The original coordinate is not recoverable; the error is bounded by the
/// cell size for the tag's precision.
pub fn decode(tag: &str) -> Result<Coordinate, GeoError> {
    decode_bbox(tag).map(|bbox| bbox.centroid())
}

/// Diagonal of a cell at the equator (the widest it gets), in kilometres.
pub fn cell_size_km(precision: usize) -> f64 {
    let bits = 5 * precision as i32;
    let lat_bits = bits / 2;
    let lon_bits = bits - lat_bits;
    let lat_span = 180.0 / 2f64.powi(lat_bits);
    let lon_span = 360.0 / 2f64.powi(lon_bits);
    let km_per_degree = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;
    (lat_span * km_per_degree).hypot(lon_span * km_per_degree)
}
