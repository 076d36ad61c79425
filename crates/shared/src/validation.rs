//! Common validation utilities.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;
use validator::ValidationError;

lazy_static! {
    /// UUID v1-5 shape: version nibble 1-5, RFC 4122 variant nibble.
    static ref UUID_SHAPE: Regex = Regex::new(
        "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$"
    )
    .expect("invalid UUID regex");
}

/// Validates that a latitude value is within valid range (-90 to 90).
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        let mut err = ValidationError::new("latitude_range");
        err.message = Some("Latitude must be between -90 and 90".into());
        Err(err)
    }
}

/// Validates that a longitude value is within valid range (-180 to 180).
pub fn validate_longitude(lng: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&lng) {
        Ok(())
    } else {
        let mut err = ValidationError::new("longitude_range");
        err.message = Some("Longitude must be between -180 and 180".into());
        Err(err)
    }
}

/// Validates that accuracy is non-negative.
pub fn validate_accuracy(accuracy: f64) -> Result<(), ValidationError> {
    if accuracy >= 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("accuracy_range");
        err.message = Some("Accuracy must be non-negative".into());
        Err(err)
    }
}

/// Validates that a distance in kilometers is non-negative.
pub fn validate_distance_km(distance: f64) -> Result<(), ValidationError> {
    if distance >= 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("distance_range");
        err.message = Some("Distance must be non-negative".into());
        Err(err)
    }
}

/// Parses a path segment as a UUID, enforcing the v1-5 shape.
///
/// `Uuid::parse_str` accepts any version nibble; route ids are restricted
/// to RFC 4122 versions 1-5 so malformed identifiers fail fast with 400.
pub fn parse_uuid_param(raw: &str) -> Result<Uuid, ValidationError> {
    if !UUID_SHAPE.is_match(raw) {
        let mut err = ValidationError::new("uuid_shape");
        err.message = Some("Must be a valid UUID (versions 1-5)".into());
        return Err(err);
    }
    Uuid::parse_str(raw).map_err(|_| {
        let mut err = ValidationError::new("uuid_shape");
        err.message = Some("Must be a valid UUID (versions 1-5)".into());
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_latitude() {
        assert!(validate_latitude(0.0).is_ok());
        assert!(validate_latitude(8.9806).is_ok());
        assert!(validate_latitude(-90.0).is_ok());
        assert!(validate_latitude(90.0).is_ok());
        assert!(validate_latitude(90.0001).is_err());
        assert!(validate_latitude(-100.0).is_err());
    }

    #[test]
    fn test_validate_longitude() {
        assert!(validate_longitude(38.7578).is_ok());
        assert!(validate_longitude(-180.0).is_ok());
        assert!(validate_longitude(180.0).is_ok());
        assert!(validate_longitude(180.5).is_err());
    }

    #[test]
    fn test_validate_accuracy() {
        assert!(validate_accuracy(0.0).is_ok());
        assert!(validate_accuracy(12.5).is_ok());
        assert!(validate_accuracy(-0.1).is_err());
    }

    #[test]
    fn test_validate_distance_km() {
        assert!(validate_distance_km(7.0).is_ok());
        assert!(validate_distance_km(-1.0).is_err());
    }

    #[test]
    fn test_parse_uuid_param_accepts_v4() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid_param(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_parse_uuid_param_accepts_v1() {
        let parsed = parse_uuid_param("550e8400-e29b-11d4-a716-446655440000");
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_parse_uuid_param_rejects_nil_and_garbage() {
        // Nil UUID has version nibble 0 and fails the shape check.
        assert!(parse_uuid_param("00000000-0000-0000-0000-000000000000").is_err());
        assert!(parse_uuid_param("not-a-uuid").is_err());
        assert!(parse_uuid_param("").is_err());
        assert!(parse_uuid_param("550e8400e29b41d4a716446655440000").is_err());
    }

    #[test]
    fn test_parse_uuid_param_rejects_bad_variant() {
        // Variant nibble outside 8-b.
        assert!(parse_uuid_param("550e8400-e29b-41d4-c716-446655440000").is_err());
    }
}
