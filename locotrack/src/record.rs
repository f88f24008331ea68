//! Sample records and the batch they are collected into.
//!
//! A [`Batch`] maps the acquisition timestamp (Unix seconds) to a [`Record`].
//! On the wire and on disk the timestamp is a JSON object key, so it is
//! string-encoded (`"1700000000"`); in memory it is an integer so that
//! iteration is always in ascending time order.
//!
//! A record is either a positional fix or one of two error reports produced
//! when the positioning command could not deliver a fix:
//!
//! ```text
//! {"latitude": 45.0, "longitude": 9.0, ..., "elapsedMs": 200}   // Location
//! {"error": "location command timed out after 20s"}             // CommandError
//! {"API_ERROR": "Location permission denied"}                   // ApiError
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Records keyed by acquisition time (Unix seconds), ascending.
pub type Batch = BTreeMap<i64, Record>;

/// A single positional fix as reported by the platform location service.
///
/// Every field is optional; absent values serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub provider: Option<String>,
    pub accuracy: Option<f64>,
    /// Milliseconds since the platform obtained this fix.
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: Option<i64>,
}

impl Location {
    /// Latitude and longitude, when both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Age of the fix in seconds (zero when `elapsedMs` is absent).
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms.map(|ms| ms as f64 / 1000.0).unwrap_or(0.0)
    }
}

/// One entry of a batch.
///
/// The variants are distinguished by their keys, not by an explicit tag. The
/// error variants come first because a location with every field absent would
/// otherwise match any object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    /// The positioning command failed or reported an error itself.
    CommandError { error: String },
    /// The platform location API refused the request (permissions, disabled service).
    ApiError {
        #[serde(rename = "API_ERROR")]
        api_error: String,
    },
    /// A positional fix.
    Location(Location),
}

/// Discriminant of a [`Record`], used for per-batch error deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Location,
    CommandError,
    ApiError,
}

impl Record {
    /// Build a command error record.
    pub fn command_error(message: impl Into<String>) -> Self {
        Record::CommandError {
            error: message.into(),
        }
    }

    /// Build a platform API error record.
    pub fn api_error(message: impl Into<String>) -> Self {
        Record::ApiError {
            api_error: message.into(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Location(_) => RecordKind::Location,
            Record::CommandError { .. } => RecordKind::CommandError,
            Record::ApiError { .. } => RecordKind::ApiError,
        }
    }

    /// The fix carried by this record, if it is one.
    pub fn as_location(&self) -> Option<&Location> {
        match self {
            Record::Location(location) => Some(location),
            _ => None,
        }
    }

    /// The error message carried by this record, if it is an error report.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Record::CommandError { error } => Some(error),
            Record::ApiError { api_error } => Some(api_error),
            Record::Location(_) => None,
        }
    }
}

/// The signed payload exchanged between tracker and ingest service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub hostname: String,
    pub termux_locations: Batch,
    /// Entries of a received batch that did not parse as records.
    #[serde(skip)]
    pub skipped_records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parses_with_nulls_and_missing_fields() {
        let json = r#"{"latitude":45.0,"longitude":9.0,"speed":null,"provider":"gps"}"#;
        let record: Record = serde_json::from_str(json).unwrap();

        let location = record.as_location().expect("should be a location");
        assert_eq!(location.coordinates(), Some((45.0, 9.0)));
        assert_eq!(location.speed, None);
        assert_eq!(location.altitude, None);
        assert_eq!(location.provider.as_deref(), Some("gps"));
    }

    #[test]
    fn test_error_keys_select_error_variants() {
        let command: Record = serde_json::from_str(r#"{"error":"timeout"}"#).unwrap();
        assert_eq!(command, Record::command_error("timeout"));
        assert_eq!(command.kind(), RecordKind::CommandError);

        let api: Record = serde_json::from_str(r#"{"API_ERROR":"denied"}"#).unwrap();
        assert_eq!(api, Record::api_error("denied"));
        assert_eq!(api.error_message(), Some("denied"));
    }

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let record = Record::Location(Location {
            latitude: Some(1.5),
            longitude: Some(2.5),
            ..Default::default()
        });
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"latitude":1.5,"longitude":2.5,"altitude":null,"speed":null,"bearing":null,"provider":null,"accuracy":null,"elapsedMs":null}"#
        );
    }

    #[test]
    fn test_batch_keys_are_strings_in_ascending_order() {
        let mut batch = Batch::new();
        batch.insert(1_700_000_100, Record::command_error("b"));
        batch.insert(1_700_000_000, Record::command_error("a"));

        let json = serde_json::to_string(&batch).unwrap();
        assert_eq!(
            json,
            r#"{"1700000000":{"error":"a"},"1700000100":{"error":"b"}}"#
        );

        let parsed: Batch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, batch);
    }

    #[test]
    fn test_elapsed_secs() {
        let location = Location {
            elapsed_ms: Some(1500),
            ..Default::default()
        };
        assert_eq!(location.elapsed_secs(), 1.5);
        assert_eq!(Location::default().elapsed_secs(), 0.0);
    }
}
