//! Configuration loading and XDG path helpers.

use std::path::PathBuf;

use ::config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::DEFAULT_BATCH_SIZE;

const CONFIG_FILE: &str = "config/settings";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve project directories")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub analysis: AnalysisConfig,
    pub batching: BatchingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of the application data directory (job store lives beneath it).
    pub data_dir: PathBuf,
    pub source_bucket: String,
    pub output_bucket: String,
    /// Global prefix prepended to every output key; may be empty.
    pub output_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Completion channel registered at submission.
    pub notification_channel: String,
    /// Identity the service assumes to publish completions.
    pub notification_role: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchingConfig {
    pub batch_size: usize,
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let default_data_dir = default_data_dir()?;
    let builder = Config::builder()
        .set_default("server.listen_addr", "127.0.0.1:8080")?
        .set_default(
            "storage.data_dir",
            default_data_dir.to_string_lossy().to_string(),
        )?
        .set_default("storage.source_bucket", "source")?
        .set_default("storage.output_bucket", "source")?
        .set_default("storage.output_prefix", "processed/")?
        .set_default("analysis.endpoint", "http://127.0.0.1:8600")?
        .set_default("analysis.notification_channel", "")?
        .set_default("analysis.notification_role", "")?
        .set_default("batching.batch_size", DEFAULT_BATCH_SIZE as i64)?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix("ANALEKTA").separator("__"));

    let cfg = builder.build()?.try_deserialize()?;
    Ok(cfg)
}

pub fn project_dirs() -> Result<ProjectDirs, AppConfigError> {
    ProjectDirs::from("dev", "analekta", "analekta").ok_or(AppConfigError::MissingProjectDirs)
}

fn default_data_dir() -> Result<PathBuf, AppConfigError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}
