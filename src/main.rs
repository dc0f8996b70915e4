mod config;
mod logging;
mod metrics;
mod migrations;

use anyhow::{bail, Result};
use tracing::info;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    logging::set_panic_hook();
    logging::init_logging_with_fallback();
    dotenvy::dotenv().ok();

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    let config = AppConfig::from_env();
    let client = config.connect().await?;
    let db = config.open_database(&client);
    info!(database = %config.database, command = %command, "Connected to catalog database");
    let ctx = migrations::MigrationContext::new(db, config.batch_size);

    match command.as_str() {
        "up" => migrations::runner::run_migrations(&ctx).await,
        "down" => migrations::runner::rollback_last(&ctx).await,
        "status" => migrations::runner::status(&ctx).await,
        other => bail!("unknown command '{}', expected up, down or status", other),
    }
}
