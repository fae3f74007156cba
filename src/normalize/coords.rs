//! Coordinate validation.
//!
//! Every coordinate entering the pipeline passes through here so that unset
//! or garbage points never reach centroid and distance math.

use serde_json::Value;

use crate::models::GeoPoint;

/// Coerce a JSON scalar (number or numeric string) to a float.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Accept a lat/lng pair or reject it as a whole.
///
/// Rejects non-finite values, out-of-range values and the `(0, 0)` point,
/// which sources use to mean "unset".
pub fn validate_coords(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    let (lat, lng) = (lat?, lng?);
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    if lat == 0.0 && lng == 0.0 {
        return None;
    }
    Some(GeoPoint { lat, lng })
}

/// Validate raw JSON values directly.
pub fn validate_values(lat: &Value, lng: &Value) -> Option<GeoPoint> {
    validate_coords(coerce_f64(lat), coerce_f64(lng))
}
