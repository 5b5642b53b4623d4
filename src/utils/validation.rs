use crate::utils::error::{Result, SiteGeoError};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Longest object key accepted by the storage backends.
pub const MAX_STORAGE_KEY_LEN: usize = 1024;

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(SiteGeoError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// Rejects storage keys that could escape the bucket or smuggle control
/// characters into paths and logs. Runs before any I/O.
pub fn validate_storage_key(key: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(SiteGeoError::InvalidStorageKey {
            key: key.escape_debug().to_string(),
            reason: reason.to_string(),
        })
    };

    if key.trim().is_empty() {
        return reject("key cannot be empty");
    }
    if key.len() > MAX_STORAGE_KEY_LEN {
        return reject("key is too long");
    }
    if key.chars().any(char::is_control) {
        return reject("key contains control characters");
    }
    if key.starts_with('/') || key.contains('\\') {
        return reject("key must be a relative path using '/' separators");
    }
    if key.split('/').any(|segment| segment == ".." || segment == ".") {
        return reject("key contains path traversal segments");
    }
    if key.split('/').any(str::is_empty) {
        return reject("key contains empty path segments");
    }

    Ok(())
}

/// WGS84 input: a decimal string with exactly six fractional digits and a
/// value inside `[-limit, limit]`.
pub fn validate_wgs84_component(field_name: &str, value: &str, limit: f64) -> Result<()> {
    let invalid = |reason: &str| SiteGeoError::InvalidCoordinateValue {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let unsigned = value.strip_prefix('-').unwrap_or(value);
    let (whole, fraction) = unsigned
        .split_once('.')
        .ok_or_else(|| invalid("expected exactly 6 decimal places"))?;

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if fraction.len() != 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("expected exactly 6 decimal places"));
    }

    let parsed: f64 = value.parse().map_err(|_| invalid("not a decimal number"))?;
    if parsed.abs() > limit {
        return Err(invalid(&format!("must be between -{} and {}", limit, limit)));
    }
    Ok(())
}

/// OSGB36 input: an unsigned 6 or 7 digit integer string.
pub fn validate_osgb36_component(field_name: &str, value: &str) -> Result<()> {
    let digits = value.len();
    if !(6..=7).contains(&digits) || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(SiteGeoError::InvalidCoordinateValue {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "expected a 6 or 7 digit integer".to_string(),
        });
    }
    Ok(())
}
