//! Prediction persistence

pub mod firestore;
pub mod memory;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::ServiceError;
use crate::gcp::GcpContext;
use crate::types::label::WasteClass;
use crate::types::prediction::{HistoryEntry, PredictionRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

/// Document store holding prediction records
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Create the document for `record`, keyed by its id.
    ///
    /// Fails if a document with that id already exists. Returns the write time
    /// assigned by the store.
    async fn insert(&self, record: &PredictionRecord) -> Result<DateTime<Utc>, ServiceError>;

    /// Read stored predictions in the store's natural order.
    ///
    /// `limit` of `None` reads the whole collection.
    async fn list(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, ServiceError>;
}

/// Creates prediction records and writes them to the store
#[derive(Clone)]
pub struct PredictionRecorder {
    store: Arc<dyn PredictionStore>,
}

impl PredictionRecorder {
    pub fn new(store: Arc<dyn PredictionStore>) -> Self {
        Self { store }
    }

    /// Persist a new prediction, returning the stored record.
    ///
    /// The record is only returned once the write has succeeded.
    pub async fn record(&self, result: WasteClass) -> Result<PredictionRecord, ServiceError> {
        let record = PredictionRecord::new(result);
        let timestamp = self.store.insert(&record).await?;

        debug!(
            prediction_id = %record.id,
            result = %record.result,
            backend = self.store.backend(),
            "Prediction recorded"
        );

        Ok(record.with_timestamp(timestamp))
    }

    /// Stored predictions, at most `limit` of them
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, ServiceError> {
        self.store.list(limit).await
    }
}

/// Build the configured store.
///
/// `gcp` must be present for the Firestore backend.
pub fn from_config(
    config: &StoreConfig,
    client: reqwest::Client,
    gcp: Option<Arc<GcpContext>>,
) -> Result<Arc<dyn PredictionStore>> {
    let store: Arc<dyn PredictionStore> = match config.backend {
        StoreBackend::Firestore => {
            let gcp = gcp.context("Firestore backend requires Google Cloud credentials")?;
            Arc::new(FirestoreStore::new(client, config, gcp))
        }
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    info!(
        backend = store.backend(),
        collection = %config.collection,
        "Prediction store initialized"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_record_persists_before_returning() {
        let store = Arc::new(MemoryStore::new());
        let recorder = PredictionRecorder::new(store.clone());

        let record = recorder.record(WasteClass::Plastic).await.unwrap();
        assert!(record.timestamp.is_some());

        let stored = store.get(&record.id).unwrap();
        assert_eq!(stored.result, WasteClass::Plastic);
        assert_eq!(stored.created_at, record.created_at);
    }

    #[tokio::test]
    async fn test_records_get_distinct_ids() {
        let recorder = PredictionRecorder::new(Arc::new(MemoryStore::new()));
        let a = recorder.record(WasteClass::Trash).await.unwrap();
        let b = recorder.record(WasteClass::Trash).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(recorder.history(None).await.unwrap().len(), 2);
    }

    #[test]
    fn test_firestore_backend_requires_credentials() {
        let config = AppConfig::default().store;
        assert!(from_config(&config, reqwest::Client::new(), None).is_err());

        let mut memory = config.clone();
        memory.backend = StoreBackend::Memory;
        let store = from_config(&memory, reqwest::Client::new(), None).unwrap();
        assert_eq!(store.backend(), "memory");
    }
}
