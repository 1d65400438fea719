use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::config::get_config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let api_state = ApiState::new(config.clone()).await?;

    let app = Router::new()
        .nest("/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    let serve_address = format!("{}:{}", config.api_host, config.api_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::path::PathBuf;
    use tower::ServiceExt;
    use upstream_client::{Credentials, UmbrellaClient};

    async fn build_test_state() -> ApiState {
        let db = std::sync::Arc::new(
            common::storage::db::SurrealDbClient::memory("main_smoke", "main_smoke_db")
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("init db");

        let client = UmbrellaClient::new(
            "https://api.umbrellacost.io/api".to_string(),
            "https://api.umbrellacost.io/api/v1/authentication/token/broker".to_string(),
            Credentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
        )
        .expect("build client");

        let broadcaster = std::sync::Arc::new(common::progress::Broadcaster::new());
        let coordinator = sync_coordinator::SyncCoordinator::new(
            client.clone(),
            db.clone(),
            broadcaster.clone(),
            PathBuf::from(std::env::temp_dir().join("main_smoke_output")),
        );
        let import_monitor = std::sync::Arc::new(sync_coordinator::ImportStatusMonitor::new(client));

        ApiState {
            db,
            config: common::config::EngineConfig {
                database_path: "./data/vtagger.db".to_string(),
                api_host: "0.0.0.0".to_string(),
                api_port: 0,
                cors_origins: Vec::new(),
                umbrella_api_base: "https://api.umbrellacost.io/api".to_string(),
                umbrella_broker_url: "https://api.umbrellacost.io/api/v1/authentication/token/broker"
                    .to_string(),
                umbrella_username: "user".to_string(),
                umbrella_password: "pass".to_string(),
                output_dir: "./data/output".to_string(),
                batch_size: 1000,
                retention_days: 90,
                sync_schedule: None,
                master_key: None,
                surrealdb_address: "mem://".to_string(),
                surrealdb_username: "root".to_string(),
                surrealdb_password: "root".to_string(),
                surrealdb_namespace: "main_smoke".to_string(),
                surrealdb_database: "main_smoke_db".to_string(),
            },
            broadcaster,
            coordinator,
            import_monitor,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn live_and_ready_probes_respond_ok() {
        let api_state = build_test_state().await;
        let app = Router::new()
            .nest("/v1", api_routes_v1(&api_state))
            .with_state(api_state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/live")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);
    }
}
