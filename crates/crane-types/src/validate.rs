//! Level and enum validators.
//!
//! Two policies live side by side:
//!
//! * **Telemetry** (`telemetry_*`) – inbound values are *checked*, never
//!   forced into range. Anything out of range or of the wrong JSON type is
//!   reported as `None` so the store keeps the previous value.
//! * **Commands** (`command_*`) – operator input is range-checked before it
//!   is sent; a value outside its domain is a [`CraneError::Validation`].

use std::str::FromStr;

use serde_json::Value;

use crate::CraneError;

/// Lowest DALI arc level.
pub const LEVEL_MIN: u8 = 0;
/// Highest DALI arc level (255 is the DALI "mask" value and never sent).
pub const LEVEL_MAX: u8 = 254;
/// Highest DALI short address.
pub const ADDRESS_MAX: u8 = 63;

/// Validate a telemetry level field.
///
/// Only JSON numbers are considered. The value is rounded to the nearest
/// integer (halves away from zero) and must then lie in
/// `LEVEL_MIN..=LEVEL_MAX`.
pub fn telemetry_level(value: &Value) -> Option<u8> {
    let rounded = value.as_f64()?.round();
    if !rounded.is_finite() {
        return None;
    }
    if rounded < f64::from(LEVEL_MIN) || rounded > f64::from(LEVEL_MAX) {
        return None;
    }
    Some(rounded as u8)
}

/// Validate a telemetry enum field: it must be a string matching one of the
/// wire spellings exactly.
pub fn telemetry_enum<T: FromStr>(value: &Value) -> Option<T> {
    value.as_str()?.parse().ok()
}

/// Validate a telemetry boolean field.
pub fn telemetry_bool(value: &Value) -> Option<bool> {
    value.as_bool()
}

/// Range-check an operator supplied level.
pub fn command_level(level254: i64) -> Result<u8, CraneError> {
    check_range("level254", level254, LEVEL_MIN, LEVEL_MAX)
}

/// Range-check an operator supplied DALI short address.
pub fn dali_address(address: i64) -> Result<u8, CraneError> {
    check_range("address", address, 0, ADDRESS_MAX)
}

/// Parse an operator supplied enum value (case-sensitive).
pub fn command_enum<T>(value: &str) -> Result<T, CraneError>
where
    T: FromStr<Err = CraneError>,
{
    value.parse()
}

fn check_range(field: &str, value: i64, min: u8, max: u8) -> Result<u8, CraneError> {
    if value < i64::from(min) || value > i64::from(max) {
        return Err(CraneError::Validation(format!(
            "{field} must be {min}..{max}, got {value}"
        )));
    }
    // In range, so the narrowing is lossless.
    Ok(value as u8)
}
