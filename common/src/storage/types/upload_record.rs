use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploading,
    Completed,
    Error,
    Cancelled,
}

stored_object!(UploadRecord, "upload_record", {
    upload_id: String,
    payer_account: String,
    row_count: usize,
    status: UploadStatus,
    api_response: Option<String>,
    error_message: Option<String>
});

impl UploadRecord {
    pub fn new(upload_id: String, payer_account: String, row_count: usize) -> Self {
        let now = chrono::Utc::now();
        UploadRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            upload_id,
            payer_account,
            row_count,
            status: UploadStatus::Uploading,
            api_response: None,
            error_message: None,
        }
    }

    pub async fn mark_completed(
        db: &SurrealDbClient,
        id: &str,
        api_response: Option<String>,
    ) -> Result<(), AppError> {
        if let Some(mut record) = db.get_item::<UploadRecord>(id).await? {
            record.status = UploadStatus::Completed;
            record.api_response = api_response;
            record.updated_at = chrono::Utc::now();
            db.store_item(record).await?;
        }
        Ok(())
    }

    pub async fn mark_error(db: &SurrealDbClient, id: &str, message: String) -> Result<(), AppError> {
        if let Some(mut record) = db.get_item::<UploadRecord>(id).await? {
            record.status = UploadStatus::Error;
            record.error_message = Some(message);
            record.updated_at = chrono::Utc::now();
            db.store_item(record).await?;
        }
        Ok(())
    }

    /// Bounded history lookup, newest first, capped at `limit` rows — mirrors
    /// the LIMIT/OFFSET pagination the upload-history endpoint exposes.
    pub async fn list_recent(db: &SurrealDbClient, limit: usize) -> Result<Vec<Self>, AppError> {
        let mut all = db.get_all_stored_items::<UploadRecord>().await?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}
