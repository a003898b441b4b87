//! Date values
//!
//! A date is a millisecond timestamp since the Unix epoch, formatted via
//! `chrono`. Invalid dates carry NaN.

use chrono::{DateTime, TimeZone, Utc};

/// A date object payload
#[derive(Debug, Clone, Copy)]
pub struct JsDate {
    epoch_ms: f64,
}

impl JsDate {
    /// Create from a millisecond timestamp
    pub fn new(epoch_ms: f64) -> Self {
        // Clamp to the ECMAScript time range; outside it the date is invalid
        const MAX_TIME: f64 = 8.64e15;
        let epoch_ms = if epoch_ms.is_finite() && epoch_ms.abs() <= MAX_TIME {
            epoch_ms.trunc()
        } else {
            f64::NAN
        };
        Self { epoch_ms }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self {
            epoch_ms: Utc::now().timestamp_millis() as f64,
        }
    }

    /// The timestamp (NaN for invalid dates)
    pub fn epoch_ms(&self) -> f64 {
        self.epoch_ms
    }

    /// Whether the date is valid
    pub fn is_valid(&self) -> bool {
        !self.epoch_ms.is_nan()
    }

    /// ISO-8601 rendering (`toISOString`)
    pub fn to_iso_string(&self) -> Option<String> {
        let dt = self.as_datetime()?;
        Some(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }

    /// Default `toString` rendering
    pub fn to_display_string(&self) -> String {
        match self.as_datetime() {
            Some(dt) => dt.format("%a %b %d %Y %H:%M:%S GMT+0000").to_string(),
            None => "Invalid Date".to_string(),
        }
    }

    fn as_datetime(&self) -> Option<DateTime<Utc>> {
        if !self.is_valid() {
            return None;
        }
        Utc.timestamp_millis_opt(self.epoch_ms as i64).single()
    }

    /// Parse an ISO-8601 date string
    pub fn parse(s: &str) -> Self {
        match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => Self::new(dt.timestamp_millis() as f64),
            Err(_) => Self::new(f64::NAN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_roundtrip() {
        let d = JsDate::new(0.0);
        assert_eq!(d.to_iso_string().unwrap(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_invalid_date() {
        let d = JsDate::new(f64::NAN);
        assert!(!d.is_valid());
        assert_eq!(d.to_display_string(), "Invalid Date");
        assert!(d.to_iso_string().is_none());
    }

    #[test]
    fn test_out_of_range_is_invalid() {
        assert!(!JsDate::new(9e15).is_valid());
        assert!(!JsDate::new(f64::INFINITY).is_valid());
    }

    #[test]
    fn test_parse_iso() {
        let d = JsDate::parse("2024-05-01T12:00:00Z");
        assert!(d.is_valid());
        assert_eq!(d.epoch_ms(), 1714564800000.0);
        assert!(!JsDate::parse("not a date").is_valid());
    }

    #[test]
    fn test_fractional_ms_truncated() {
        assert_eq!(JsDate::new(1.9).epoch_ms(), 1.0);
    }
}
