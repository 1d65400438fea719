use std::{path::PathBuf, sync::Arc};

use common::{
    config::EngineConfig,
    error::AppError,
    progress::Broadcaster,
    storage::db::SurrealDbClient,
};
use sync_coordinator::{ImportStatusMonitor, SyncCoordinator};
use upstream_client::{Credentials, UmbrellaClient};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: EngineConfig,
    pub broadcaster: Arc<Broadcaster>,
    pub coordinator: Arc<SyncCoordinator>,
    pub import_monitor: Arc<ImportStatusMonitor>,
}

impl ApiState {
    /// Connects to SurrealDB, builds the indexes the dimension store relies
    /// on, and wires the upstream client, broadcaster, sync coordinator, and
    /// import-status monitor around it.
    pub async fn new(config: EngineConfig) -> Result<Self, AppError> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized().await?;

        let credentials = Credentials {
            username: config.umbrella_username.clone(),
            password: config.umbrella_password.clone(),
        };
        let client = UmbrellaClient::new(
            config.umbrella_api_base.clone(),
            config.umbrella_broker_url.clone(),
            credentials,
        )?;

        let broadcaster = Arc::new(Broadcaster::new());
        let coordinator = SyncCoordinator::new(
            client.clone(),
            db.clone(),
            broadcaster.clone(),
            PathBuf::from(&config.output_dir),
        );
        let import_monitor = Arc::new(ImportStatusMonitor::new(client));

        Ok(ApiState {
            db,
            config,
            broadcaster,
            coordinator,
            import_monitor,
        })
    }
}
