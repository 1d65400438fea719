use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

/// The upstream import-status endpoint is keyed only by upload id, but its
/// poll also needs the payer/account and sync window it belongs to — those
/// travel as query params since they aren't recoverable from the id alone.
#[derive(Debug, Deserialize)]
pub struct UploadStatusQuery {
    pub account_id: String,
    pub sync_type: String,
    pub start_date: String,
    pub end_date: String,
}

pub async fn upload_status(
    State(state): State<ApiState>,
    Path(upload_id): Path<String>,
    Query(query): Query<UploadStatusQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let record = state
        .import_monitor
        .status(
            &upload_id,
            &query.account_id,
            &query.sync_type,
            &query.start_date,
            &query.end_date,
        )
        .await?;
    Ok(Json(record))
}
