//! Remote document store access
//!
//! The remote side is a per-user collection of documents for each entity
//! type, keyed by entity id. Every document carries the entity's fields plus a
//! server-maintained `updatedAt`. Reads filter on "modified after"; writes are
//! upsert-merges that leave unspecified fields alone.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};
use crate::types::{format_timestamp, snapshot_timestamp, EntityKey, EntityType, Snapshot};

/// Default timeout for a single remote request
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY_CHARS: usize = 256;

/// A document fetched from the remote store
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: Snapshot,
    /// Server-assigned last-modified time
    pub modified_at: DateTime<Utc>,
}

impl RemoteDocument {
    /// Build a document from its fields, taking the id from `id` and the
    /// modification time from `updatedAt`/`createdAt`
    pub fn from_fields(fields: Snapshot) -> SyncResult<Self> {
        let id = match fields.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SyncError::Serialization(
                    "remote document without an id".to_string(),
                ))
            }
        };
        let modified_at = snapshot_timestamp(&fields);
        Ok(Self {
            id,
            fields,
            modified_at,
        })
    }
}

/// Per-user remote document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Documents of `entity_type` modified strictly after `since` (all of
    /// them when `since` is `None`)
    async fn fetch_modified_since(
        &self,
        entity_type: &EntityType,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteDocument>>;

    /// Upsert-merge `fields` into the document for `key`
    async fn upsert(&self, key: &EntityKey, fields: &Snapshot) -> SyncResult<()>;

    async fn delete(&self, key: &EntityKey) -> SyncResult<()>;
}

/// [`RemoteStore`] over a JSON REST API.
///
/// ```text
/// GET    {base}/users/{user}/{collection}?modifiedAfter={rfc3339}
/// PATCH  {base}/users/{user}/{collection}/{id}     (merge)
/// DELETE {base}/users/{user}/{collection}/{id}
/// ```
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, user_id: impl Into<String>) -> SyncResult<Self> {
        Self::with_timeout(base_url, user_id, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: &str,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        })
    }

    fn collection_url(&self, entity_type: &EntityType) -> String {
        format!(
            "{}/users/{}/{}",
            self.base_url, self.user_id, entity_type
        )
    }

    fn document_url(&self, key: &EntityKey) -> String {
        format!("{}/{}", self.collection_url(&key.entity_type), key.entity_id)
    }

    async fn check_status(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            trace!(%status, "Remote response");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let mut message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        if body.chars().count() > MAX_ERROR_BODY_CHARS {
            message.push_str("...");
        }
        debug!(%status, %message, "Remote request rejected");
        Err(SyncError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

/// Map a transport failure: no route to the server aborts the drain, any
/// other failure is charged to the request
fn map_transport_error(err: reqwest::Error) -> SyncError {
    if err.is_connect() {
        SyncError::Unreachable(err.to_string())
    } else if err.is_decode() {
        SyncError::Serialization(err.to_string())
    } else {
        SyncError::Network(err.to_string())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_modified_since(
        &self,
        entity_type: &EntityType,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteDocument>> {
        let mut request = self.client.get(self.collection_url(entity_type));
        if let Some(since) = since {
            if let Value::String(since) = format_timestamp(since) {
                request = request.query(&[("modifiedAfter", since)]);
            }
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;
        let documents: Vec<Snapshot> = response.json().await.map_err(map_transport_error)?;

        debug!(
            entity_type = %entity_type,
            count = documents.len(),
            "Fetched remote documents"
        );
        documents.into_iter().map(RemoteDocument::from_fields).collect()
    }

    async fn upsert(&self, key: &EntityKey, fields: &Snapshot) -> SyncResult<()> {
        let response = self
            .client
            .patch(self.document_url(key))
            .json(fields)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, key: &EntityKey) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.document_url(key))
            .send()
            .await
            .map_err(map_transport_error)?;

        // Deleting something already gone is success
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(response).await?;
        Ok(())
    }
}
