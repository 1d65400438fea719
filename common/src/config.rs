use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Engine-wide configuration, sourced from environment variables (prefix
/// `VTAGGER_`) with an optional `config.yaml` file providing lower-precedence
/// defaults — env vars always win, matching the source project's merge
/// order.
#[derive(Clone, Deserialize, Debug)]
pub struct EngineConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_umbrella_api_base")]
    pub umbrella_api_base: String,
    #[serde(default = "default_umbrella_broker_url")]
    pub umbrella_broker_url: String,
    pub umbrella_username: String,
    pub umbrella_password: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Present only so an external scheduler (cron, k8s CronJob) can read the
    /// intended cadence back out of config; this engine never schedules
    /// itself — sync runs are always triggered by an external caller (§1).
    #[serde(default)]
    pub sync_schedule: Option<String>,
    #[serde(default)]
    pub master_key: Option<String>,
    pub surrealdb_address: String,
    #[serde(default = "default_surreal_user")]
    pub surrealdb_username: String,
    #[serde(default = "default_surreal_user")]
    pub surrealdb_password: String,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_database")]
    pub surrealdb_database: String,
}

fn default_database_path() -> String {
    "./data/vtagger.db".to_string()
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_umbrella_api_base() -> String {
    "https://api.umbrellacost.io/api".to_string()
}
fn default_umbrella_broker_url() -> String {
    "https://api.umbrellacost.io/api/v1/authentication/token/broker".to_string()
}
fn default_output_dir() -> String {
    "./data/output".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_retention_days() -> u32 {
    90
}
fn default_surreal_user() -> String {
    "root".to_string()
}
fn default_namespace() -> String {
    "vtagger".to_string()
}
fn default_database() -> String {
    "vtagger".to_string()
}

/// Loads configuration from `config.yaml` (if present, optional) overridden
/// by `VTAGGER_*` environment variables.
pub fn get_config() -> Result<EngineConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::with_prefix("VTAGGER"))
        .build()?;

    config.try_deserialize()
}
