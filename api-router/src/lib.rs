use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    liveness::live,
    readiness::ready,
    sync::{
        cancel_sync, start_month_sync, start_range_sync, start_week_sync, sync_progress,
        sync_stream,
    },
    uploads::upload_status,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1.
pub fn api_routes_v1<S>(_app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let sync = Router::new()
        .route("/sync/week", post(start_week_sync))
        .route("/sync/month", post(start_month_sync))
        .route("/sync/range", post(start_range_sync))
        .route("/sync/cancel", post(cancel_sync))
        .route("/sync/progress", get(sync_progress))
        .route("/sync/stream", get(sync_stream))
        .route("/uploads/{upload_id}/status", get(upload_status));

    public.merge(sync)
}
