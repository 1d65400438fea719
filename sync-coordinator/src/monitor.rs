//! Import-Status Monitor: a thin caching wrapper over
//! `UmbrellaClient::poll_import_status`, merging the upstream response into
//! the record shape the control plane exposes. Terminal phases
//! (`completed`, `failed`) are cached permanently; everything else,
//! including a failed poll attempt itself (`fetch_error`), stays pollable.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use common::error::AppError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use upstream_client::UmbrellaClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusRecord {
    pub upload_id: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub phase_description: Option<String>,
    pub total_rows: Option<u64>,
    pub processed_rows: Option<u64>,
    pub errors: Option<Vec<String>>,
    pub status: Option<String>,
    pub import_mode: Option<String>,
    pub inserted: Option<u64>,
    pub updated: Option<u64>,
    pub deleted: Option<u64>,
    pub sync_type: String,
    pub start_date: String,
    pub end_date: String,
}

impl UploadStatusRecord {
    fn is_permanent(&self) -> bool {
        matches!(self.phase.as_str(), "completed" | "failed")
    }
}

pub struct ImportStatusMonitor {
    client: Arc<UmbrellaClient>,
    cache: Mutex<HashMap<String, UploadStatusRecord>>,
}

impl ImportStatusMonitor {
    #[must_use]
    pub fn new(client: Arc<UmbrellaClient>) -> Self {
        ImportStatusMonitor {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a cached terminal record if one exists for `upload_id`;
    /// otherwise polls upstream once, merges the response (or records a
    /// `fetch_error` phase if the poll itself failed), and caches the
    /// result only when it has reached a terminal phase.
    pub async fn status(
        &self,
        upload_id: &str,
        account_id: &str,
        sync_type: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<UploadStatusRecord, AppError> {
        if let Some(cached) = self.cached_terminal(upload_id).await {
            return Ok(cached);
        }

        let record = match self.client.poll_import_status(upload_id).await {
            Ok(status) => UploadStatusRecord {
                upload_id: upload_id.to_string(),
                account_id: account_id.to_string(),
                timestamp: Utc::now(),
                phase: status.phase,
                phase_description: status.phase_description,
                total_rows: status.total_rows,
                processed_rows: status.processed_rows,
                errors: status.errors,
                status: status.status,
                import_mode: status.import_mode,
                inserted: status.operations.as_ref().map(|o| o.inserted),
                updated: status.operations.as_ref().map(|o| o.updated),
                deleted: status.operations.as_ref().map(|o| o.deleted),
                sync_type: sync_type.to_string(),
                start_date: start_date.to_string(),
                end_date: end_date.to_string(),
            },
            Err(err) => {
                warn!(upload_id, error = %err, "import status poll failed");
                UploadStatusRecord {
                    upload_id: upload_id.to_string(),
                    account_id: account_id.to_string(),
                    timestamp: Utc::now(),
                    phase: "fetch_error".to_string(),
                    phase_description: Some(err.to_string()),
                    total_rows: None,
                    processed_rows: None,
                    errors: None,
                    status: Some("error".to_string()),
                    import_mode: None,
                    inserted: None,
                    updated: None,
                    deleted: None,
                    sync_type: sync_type.to_string(),
                    start_date: start_date.to_string(),
                    end_date: end_date.to_string(),
                }
            }
        };

        if record.is_permanent() {
            self.cache.lock().await.insert(upload_id.to_string(), record.clone());
        }

        Ok(record)
    }

    async fn cached_terminal(&self, upload_id: &str) -> Option<UploadStatusRecord> {
        let cache = self.cache.lock().await;
        cache.get(upload_id).filter(|r| r.is_permanent()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: &str) -> UploadStatusRecord {
        UploadStatusRecord {
            upload_id: "up-1".to_string(),
            account_id: "acct-1".to_string(),
            timestamp: Utc::now(),
            phase: phase.to_string(),
            phase_description: None,
            total_rows: None,
            processed_rows: None,
            errors: None,
            status: None,
            import_mode: None,
            inserted: None,
            updated: None,
            deleted: None,
            sync_type: "week".to_string(),
            start_date: "2026-01-05".to_string(),
            end_date: "2026-01-11".to_string(),
        }
    }

    #[test]
    fn completed_and_failed_are_permanent() {
        assert!(record("completed").is_permanent());
        assert!(record("failed").is_permanent());
        assert!(!record("processing").is_permanent());
        assert!(!record("fetch_error").is_permanent());
    }
}
