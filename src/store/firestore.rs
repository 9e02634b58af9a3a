//! Cloud Firestore backend over the REST API

use crate::config::StoreConfig;
use crate::error::ServiceError;
use crate::gcp::GcpContext;
use crate::store::PredictionStore;
use crate::types::prediction::{HistoryEntry, PredictionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    write_results: Vec<WriteResult>,
    commit_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResult {
    #[serde(default)]
    transform_results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    fields: HashMap<String, Value>,
}

impl Document {
    fn string_field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(|v| v.get("stringValue"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn to_entry(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.string_field("id"),
            result: self.string_field("result"),
            created_at: self.string_field("createdAt"),
        }
    }
}

/// Prediction store backed by a Firestore collection
pub struct FirestoreStore {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    collection: String,
    page_size: usize,
    gcp: Arc<GcpContext>,
}

impl FirestoreStore {
    pub fn new(client: reqwest::Client, config: &StoreConfig, gcp: Arc<GcpContext>) -> Self {
        Self {
            client,
            endpoint: config.firestore_endpoint.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            collection: config.collection.clone(),
            page_size: config.page_size.max(1),
            gcp,
        }
    }

    /// `projects/{p}/databases/{d}/documents`
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.gcp.project_id, self.database
        )
    }

    fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.documents_root(), self.collection, id)
    }

    /// Commit request creating the document with a server-side `timestamp`
    fn commit_body(&self, record: &PredictionRecord) -> Value {
        json!({
            "writes": [{
                "update": {
                    "name": self.document_name(&record.id),
                    "fields": {
                        "id": { "stringValue": record.id },
                        "result": { "stringValue": record.result.as_str() },
                        "createdAt": { "stringValue": record.created_at },
                    }
                },
                "updateTransforms": [{
                    "fieldPath": "timestamp",
                    "setToServerValue": "REQUEST_TIME"
                }],
                "currentDocument": { "exists": false }
            }]
        })
    }

    async fn bearer(&self) -> Result<String, ServiceError> {
        self.gcp
            .tokens
            .token()
            .await
            .map_err(|e| ServiceError::Storage(format!("{:#}", e)))
    }
}

/// Server timestamp from a commit response
fn commit_timestamp(response: &CommitResponse) -> Option<DateTime<Utc>> {
    response
        .write_results
        .first()
        .and_then(|w| w.transform_results.first())
        .and_then(|v| v.get("timestampValue"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .or(response.commit_time)
}

/// Turn a non-success response into a storage error carrying Firestore's message
async fn error_from_response(response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);

    ServiceError::Storage(format!("Firestore request failed ({}): {}", status, message))
}

#[async_trait]
impl PredictionStore for FirestoreStore {
    fn backend(&self) -> &'static str {
        "firestore"
    }

    async fn insert(&self, record: &PredictionRecord) -> Result<DateTime<Utc>, ServiceError> {
        let url = format!(
            "{}/v1/projects/{}/databases/{}/documents:commit",
            self.endpoint, self.gcp.project_id, self.database
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .json(&self.commit_body(record))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let commit: CommitResponse = response.json().await?;
        let timestamp = commit_timestamp(&commit).unwrap_or_else(|| {
            warn!(prediction_id = %record.id, "Commit response carried no timestamp");
            Utc::now()
        });

        debug!(prediction_id = %record.id, timestamp = %timestamp, "Document committed");
        Ok(timestamp)
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, ServiceError> {
        let url = format!(
            "{}/v1/{}/{}",
            self.endpoint,
            self.documents_root(),
            self.collection
        );
        let token = self.bearer().await?;

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = limit.map(|l| l.saturating_sub(entries.len()));
            if remaining == Some(0) {
                break;
            }
            let page_size = remaining.map_or(self.page_size, |r| r.min(self.page_size));

            let mut request = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("pageSize", page_size.to_string())]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }

            let page: ListDocumentsResponse = response.json().await?;
            entries.extend(page.documents.iter().map(Document::to_entry));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        debug!(count = entries.len(), "Listed prediction documents");
        Ok(entries)
    }
}
