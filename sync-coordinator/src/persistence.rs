//! Atomic `last_sync_result.json` and a bounded upload-history file, both
//! written with write-to-temp-then-rename so a crash mid-write never leaves
//! a half-written file behind for the control plane to read.

use std::path::Path;

use chrono::{DateTime, Utc};
use common::error::AppError;
use serde::{Deserialize, Serialize};

use crate::upload::UploadSummary;

/// Upload history is capped to the most recent runs; older entries are
/// dropped rather than growing the file without bound.
const MAX_UPLOAD_HISTORY: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastSyncResult {
    pub status: String,
    pub sync_type: String,
    pub start_date: String,
    pub end_date: String,
    pub total_resources: u64,
    pub matched_resources: u64,
    pub unmatched_resources: u64,
    pub account_errors: u64,
    pub uploads: Vec<UploadSummary>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn write_last_result(output_dir: &Path, result: &LastSyncResult) -> Result<(), AppError> {
    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join("last_sync_result.json");
    let bytes = serde_json::to_vec_pretty(result)?;
    atomic_write(&path, &bytes).await
}

pub async fn read_last_result(output_dir: &Path) -> Result<Option<LastSyncResult>, AppError> {
    let path = output_dir.join("last_sync_result.json");
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::from(err)),
    }
}

/// Appends this run's upload summaries to the bounded history file.
pub async fn append_upload_history(
    output_dir: &Path,
    uploads: &[UploadSummary],
) -> Result<(), AppError> {
    if uploads.is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join("upload_history.json");
    let mut history: Vec<UploadSummary> = match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    history.extend_from_slice(uploads);
    if history.len() > MAX_UPLOAD_HISTORY {
        let excess = history.len() - MAX_UPLOAD_HISTORY;
        history.drain(0..excess);
    }
    let bytes = serde_json::to_vec_pretty(&history)?;
    atomic_write(&path, &bytes).await
}

pub async fn read_upload_history(output_dir: &Path) -> Result<Vec<UploadSummary>, AppError> {
    let path = output_dir.join("upload_history.json");
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(AppError::from(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> LastSyncResult {
        LastSyncResult {
            status: "complete".to_string(),
            sync_type: "week".to_string(),
            start_date: "2026-01-05".to_string(),
            end_date: "2026-01-11".to_string(),
            total_resources: 10,
            matched_resources: 8,
            unmatched_resources: 2,
            account_errors: 0,
            uploads: vec![UploadSummary {
                payer_account: "111111111111".to_string(),
                upload_id: "up-1".to_string(),
                row_count: 8,
            }],
            error_message: None,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let result = sample_result();
        write_last_result(dir.path(), &result).await.unwrap();
        let read = read_last_result(dir.path()).await.unwrap().unwrap();
        assert_eq!(read.status, "complete");
        assert_eq!(read.uploads.len(), 1);
    }

    #[tokio::test]
    async fn missing_last_result_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_last_result(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upload_history_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(MAX_UPLOAD_HISTORY + 10) {
            let uploads = vec![UploadSummary {
                payer_account: format!("payer-{i}"),
                upload_id: format!("up-{i}"),
                row_count: 1,
            }];
            append_upload_history(dir.path(), &uploads).await.unwrap();
        }
        let history = read_upload_history(dir.path()).await.unwrap();
        assert_eq!(history.len(), MAX_UPLOAD_HISTORY);
        assert_eq!(history.last().unwrap().payer_account, format!("payer-{}", MAX_UPLOAD_HISTORY + 9));
    }
}
