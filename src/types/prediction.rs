//! Prediction records persisted by the result recorder

use crate::types::label::WasteClass;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single stored prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    /// UUIDv4, also the document key
    pub id: String,

    /// Predicted class
    pub result: WasteClass,

    /// ISO-8601 UTC time captured when the prediction was made
    pub created_at: String,

    /// Write time assigned by the store, unset until persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PredictionRecord {
    /// Create an unsaved record with a fresh id and the current time
    pub fn new(result: WasteClass) -> Self {
        Self::at(result, Utc::now())
    }

    /// Create an unsaved record with a fresh id and the given time
    pub fn at(result: WasteClass, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            result,
            created_at: created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            timestamp: None,
        }
    }

    /// Attach the store-assigned write time
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Fields echoed back to the client
    pub fn summary(&self) -> PredictionSummary {
        PredictionSummary {
            id: self.id.clone(),
            result: self.result,
            created_at: self.created_at.clone(),
        }
    }
}

/// Response payload for a successful prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSummary {
    pub id: String,
    pub result: WasteClass,
    pub created_at: String,
}

/// One row of the prediction history.
///
/// Fields are optional because documents are read back as stored; a document
/// written by another client may lack any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Option<String>,
    pub result: Option<String>,
    pub created_at: Option<String>,
}

impl From<&PredictionRecord> for HistoryEntry {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            id: Some(record.id.clone()),
            result: Some(record.result.to_string()),
            created_at: Some(record.created_at.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_record_has_fresh_uuid() {
        let a = PredictionRecord::new(WasteClass::Paper);
        let b = PredictionRecord::new(WasteClass::Paper);

        assert_ne!(a.id, b.id);
        let parsed = uuid::Uuid::parse_str(&a.id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert!(a.timestamp.is_none());
    }

    #[test]
    fn test_created_at_is_iso8601_utc() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 5).unwrap();
        let record = PredictionRecord::at(WasteClass::Shoes, at);

        assert_eq!(record.created_at, "2024-06-01T12:30:05.000000Z");
        assert!(DateTime::parse_from_rfc3339(&record.created_at).is_ok());
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 5).unwrap();
        let record = PredictionRecord::at(WasteClass::GreenGlass, at).with_timestamp(at);
        let json = serde_json::to_value(record.summary()).unwrap();

        assert_eq!(json["id"], record.id.as_str());
        assert_eq!(json["result"], "green-glass");
        assert_eq!(json["createdAt"], "2024-06-01T12:30:05.000000Z");
        assert!(json.get("timestamp").is_none());
    }
}
