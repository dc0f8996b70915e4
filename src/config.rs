use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Database};

use crate::migrations::helpers::DEFAULT_BATCH_SIZE;

/// Runtime configuration, read from the environment with defaults suitable
/// for a local deployment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mongo_uri: String,
    pub database: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub max_idle_time_ms: u64,
    pub connect_timeout_ms: u64,
    /// Number of pending updates a backfill batch holds before flushing.
    pub batch_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mongo_uri =
            env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let database = env::var("CATALOG_DB").unwrap_or_else(|_| "opencga_catalog".to_string());
        let max_pool_size = env::var("MONGODB_MAX_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);
        let min_pool_size = env::var("MONGODB_MIN_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let max_idle_time_ms = env::var("MONGODB_MAX_IDLE_TIME_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300_000);
        let connect_timeout_ms = env::var("MONGODB_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);
        let batch_size = env::var("MIGRATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        AppConfig {
            mongo_uri,
            database,
            max_pool_size,
            min_pool_size,
            max_idle_time_ms,
            connect_timeout_ms,
            batch_size,
        }
    }

    /// Build a pooled client for the configured deployment. The client manages
    /// its connection pool internally; it is released when the process exits.
    pub async fn connect(&self) -> Result<Client> {
        let mut client_options = ClientOptions::parse(&self.mongo_uri)
            .await
            .with_context(|| format!("failed to parse MongoDB URI {}", self.mongo_uri))?;
        client_options.max_pool_size = Some(self.max_pool_size);
        client_options.min_pool_size = Some(self.min_pool_size);
        client_options.max_idle_time = Some(Duration::from_millis(self.max_idle_time_ms));
        client_options.connect_timeout = Some(Duration::from_millis(self.connect_timeout_ms));
        client_options.server_api =
            Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        client_options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        Client::with_options(client_options).context("failed to build MongoDB client")
    }

    pub fn open_database(&self, client: &Client) -> Database {
        client.database(&self.database)
    }
}
