//! # Validation Rules
//!
//! Field validation for tag configurations, applied before a payload is
//! accepted from the operator. Devices never see an invalid `SET`.

use crate::error::{ValidationError, ValidationResult};

/// Maximum length of a location string.
///
/// Shelf labels render the location on a single display line; anything
/// longer is truncated by the firmware, so reject it up front.
pub const MAX_UBICACION_LEN: usize = 64;

/// Validates an article id: must be positive.
pub fn validate_tag_id(id: i64) -> ValidationResult<()> {
    if id <= 0 {
        return Err(ValidationError::InvalidTagId(id));
    }
    Ok(())
}

/// Validates a price: finite and non-negative.
pub fn validate_precio(precio: f64) -> ValidationResult<()> {
    if !precio.is_finite() {
        return Err(ValidationError::NonFinitePrice);
    }
    if precio < 0.0 {
        return Err(ValidationError::NegativePrice(precio));
    }
    Ok(())
}

/// Validates a location string: non-blank and within the display budget.
pub fn validate_ubicacion(ubicacion: &str) -> ValidationResult<()> {
    if ubicacion.trim().is_empty() {
        return Err(ValidationError::EmptyLocation);
    }
    let len = ubicacion.chars().count();
    if len > MAX_UBICACION_LEN {
        return Err(ValidationError::LocationTooLong {
            len,
            max: MAX_UBICACION_LEN,
        });
    }
    Ok(())
}

/// Validates a hardware UID: non-empty, even-length, hex digits only.
///
/// PN532 readers report 4- or 7-byte UIDs as uppercase hex, but we accept
/// either case since the value is treated as opaque.
pub fn validate_uid_hex(uid: &str) -> ValidationResult<()> {
    let ok = !uid.is_empty()
        && uid.len() % 2 == 0
        && uid.chars().all(|c| c.is_ascii_hexdigit());
    if !ok {
        return Err(ValidationError::InvalidUid(uid.to_string()));
    }
    Ok(())
}
