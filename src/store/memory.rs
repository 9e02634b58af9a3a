//! In-process prediction store for development and tests

use crate::error::ServiceError;
use crate::store::PredictionStore;
use crate::types::prediction::{HistoryEntry, PredictionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Keeps records in insertion order
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<PredictionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record with the given id
    pub fn get(&self, id: &str) -> Option<PredictionRecord> {
        self.records
            .read()
            .ok()?
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: &PredictionRecord) -> Result<DateTime<Utc>, ServiceError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| ServiceError::Storage(format!("Lock error: {}", e)))?;

        if records.iter().any(|r| r.id == record.id) {
            return Err(ServiceError::Storage(format!(
                "Document already exists: predictions/{}",
                record.id
            )));
        }

        let timestamp = Utc::now();
        records.push(record.clone().with_timestamp(timestamp));
        Ok(timestamp)
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, ServiceError> {
        let records = self
            .records
            .read()
            .map_err(|e| ServiceError::Storage(format!("Lock error: {}", e)))?;

        let take = limit.unwrap_or(records.len());
        Ok(records.iter().take(take).map(HistoryEntry::from).collect())
    }
}
