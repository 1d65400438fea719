use std::{collections::HashSet, convert::Infallible, pin::Pin, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, KeepAliveStream},
    response::{IntoResponse, Sse},
    Json,
};
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sync_coordinator::{SyncMode, SyncRequest};
use upstream_client::FilterMode;

use crate::{api_state::ApiState, error::ApiError};

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;
type SseResponse = Sse<KeepAliveStream<EventStream>>;

/// Shared body for all three sync-trigger endpoints; only the date fields
/// that select the window differ per route.
#[derive(Debug, Deserialize, Default)]
pub struct SyncRequestBody {
    #[serde(default)]
    pub account_keys: Vec<String>,
    #[serde(default)]
    pub dimension_subset: Option<HashSet<String>>,
    #[serde(default)]
    pub not_vtagged_only: bool,
    #[serde(default)]
    pub force_all: bool,
}

#[derive(Debug, Deserialize)]
pub struct WeekSyncBody {
    pub year: i32,
    pub week: u32,
    #[serde(flatten)]
    pub common: SyncRequestBody,
}

#[derive(Debug, Deserialize)]
pub struct MonthSyncBody {
    pub year: i32,
    pub month: u32,
    #[serde(flatten)]
    pub common: SyncRequestBody,
}

#[derive(Debug, Deserialize)]
pub struct RangeSyncBody {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub simulation: bool,
    #[serde(flatten)]
    pub common: SyncRequestBody,
}

fn to_request(body: SyncRequestBody) -> SyncRequest {
    SyncRequest {
        account_keys: body.account_keys,
        dimension_subset: body.dimension_subset,
        filter_mode: if body.not_vtagged_only {
            FilterMode::NotVtagged
        } else {
            FilterMode::All
        },
        force_all: body.force_all,
    }
}

#[derive(Serialize)]
struct AcceptedResponse {
    status: &'static str,
}

async fn accept(
    state: &ApiState,
    mode: SyncMode,
    request: SyncRequest,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.spawn(mode, request)?;
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "accepted" }),
    ))
}

pub async fn start_week_sync(
    State(state): State<ApiState>,
    Json(body): Json<WeekSyncBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = SyncMode::Week {
        year: body.year,
        week: body.week,
    };
    accept(&state, mode, to_request(body.common)).await
}

pub async fn start_month_sync(
    State(state): State<ApiState>,
    Json(body): Json<MonthSyncBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = SyncMode::Month {
        year: body.year,
        month: body.month,
    };
    accept(&state, mode, to_request(body.common)).await
}

pub async fn start_range_sync(
    State(state): State<ApiState>,
    Json(body): Json<RangeSyncBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = if body.simulation {
        SyncMode::Simulation {
            start: body.start,
            end: body.end,
        }
    } else {
        SyncMode::Range {
            start: body.start,
            end: body.end,
        }
    };
    accept(&state, mode, to_request(body.common)).await
}

/// Always 200, even when idle — cancelling nothing is not an error.
pub async fn cancel_sync(State(state): State<ApiState>) -> impl IntoResponse {
    state.coordinator.cancel();
    Json(json!({"status": "cancelled"}))
}

/// Merged view: the live broadcaster snapshot while a run is active,
/// otherwise the persisted result of the last completed run.
pub async fn sync_progress(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.broadcaster.snapshot().await;
    if snapshot.state.is_running() {
        return Json(json!({ "live": snapshot })).into_response();
    }
    let last_result = state.coordinator.last_result().await;
    Json(json!({ "live": snapshot, "last_result": last_result })).into_response()
}

/// SSE stream of progress snapshots: the current snapshot is delivered
/// immediately on subscribe, then every subsequent state/progress update,
/// plus a keepalive the `KeepAlive` layer emits whenever the subscriber has
/// otherwise gone quiet for longer than its configured interval.
pub async fn sync_stream(State(state): State<ApiState>) -> SseResponse {
    let mut rx = state.broadcaster.subscribe().await;
    let event_stream = async_stream::stream! {
        while let Some(snapshot) = rx.recv().await {
            match serde_json::to_string(&snapshot) {
                Ok(data) => yield Ok(Event::default().event("progress").data(data)),
                Err(err) => {
                    yield Ok(Event::default().event("error").data(err.to_string()));
                }
            }
        }
    };

    Sse::new(event_stream.boxed() as EventStream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_flag_selects_simulation_mode() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 11).unwrap();
        let body = RangeSyncBody {
            start,
            end,
            simulation: true,
            common: SyncRequestBody::default(),
        };
        let mode = if body.simulation {
            SyncMode::Simulation {
                start: body.start,
                end: body.end,
            }
        } else {
            SyncMode::Range {
                start: body.start,
                end: body.end,
            }
        };
        assert!(mode.is_simulation());
    }

    #[test]
    fn not_vtagged_only_selects_filter_mode() {
        let request = to_request(SyncRequestBody {
            not_vtagged_only: true,
            ..SyncRequestBody::default()
        });
        assert_eq!(request.filter_mode, FilterMode::NotVtagged);
    }
}
