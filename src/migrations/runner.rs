use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, DateTime as MongoDateTime};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::Timer;
use crate::migrations::{all_migrations, MigrationContext};

const MIGRATIONS_COLLECTION: &str = "migrations";

/// One row of the `migrations` bookkeeping collection.
#[derive(Debug, Serialize, Deserialize)]
struct MigrationRecord {
    version: i64,
    name: String,
    #[serde(rename = "appliedAt")]
    applied_at: MongoDateTime,
}

fn records(db: &Database) -> Collection<MigrationRecord> {
    db.collection::<MigrationRecord>(MIGRATIONS_COLLECTION)
}

async fn applied_records(db: &Database) -> Result<Vec<MigrationRecord>> {
    let mut cursor = records(db)
        .find(None, None)
        .await
        .context("failed to read applied migrations")?;
    let mut applied = Vec::new();
    while let Some(record) = cursor.try_next().await? {
        applied.push(record);
    }
    applied.sort_by_key(|r| r.version);
    Ok(applied)
}

/// Apply every registered migration that has not been recorded yet, in
/// version order. Each migration runs to completion and is acknowledged
/// before the next one starts.
pub async fn run_migrations(ctx: &MigrationContext) -> Result<()> {
    let db = &ctx.db;
    let applied: Vec<i64> = applied_records(db).await?.iter().map(|r| r.version).collect();
    let mut ran = 0usize;
    for migration in all_migrations() {
        if applied.contains(&migration.version()) {
            info!(
                version = migration.version(),
                name = migration.name(),
                "Migration already applied, skipping"
            );
            continue;
        }
        info!(
            version = migration.version(),
            name = migration.name(),
            "Applying migration"
        );
        let timer = Timer::new(format!("migration {}", migration.name()));
        migration.up(ctx).await.with_context(|| {
            format!(
                "migration {} ({}) failed",
                migration.version(),
                migration.name()
            )
        })?;
        timer.log_elapsed(None);
        records(db)
            .insert_one(
                MigrationRecord {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    applied_at: MongoDateTime::now(),
                },
                None,
            )
            .await
            .context("failed to record applied migration")?;
        ran += 1;
    }
    info!(applied = ran, "Migration run finished");
    Ok(())
}

/// Roll back the most recently applied migration, if any.
pub async fn rollback_last(ctx: &MigrationContext) -> Result<()> {
    let db = &ctx.db;
    let applied = applied_records(db).await?;
    let last = match applied.last() {
        Some(record) => record,
        None => {
            warn!("No applied migrations to roll back");
            return Ok(());
        }
    };
    let migration = all_migrations()
        .into_iter()
        .find(|m| m.version() == last.version)
        .with_context(|| {
            format!(
                "applied migration {} ({}) is not in the registry",
                last.version, last.name
            )
        })?;
    info!(
        version = migration.version(),
        name = migration.name(),
        "Rolling back migration"
    );
    let timer = Timer::new(format!("rollback {}", migration.name()));
    migration.down(ctx).await.with_context(|| {
        format!(
            "rollback of migration {} ({}) failed",
            migration.version(),
            migration.name()
        )
    })?;
    timer.log_elapsed(None);
    records(db)
        .delete_one(doc! {"version": last.version}, None)
        .await
        .context("failed to delete migration record")?;
    Ok(())
}

/// Log applied/pending state for every registered migration.
pub async fn status(ctx: &MigrationContext) -> Result<()> {
    let applied = applied_records(&ctx.db).await?;
    for migration in all_migrations() {
        match applied.iter().find(|r| r.version == migration.version()) {
            Some(record) => {
                let applied_at =
                    DateTime::<Utc>::from_timestamp_millis(record.applied_at.timestamp_millis())
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "unknown".to_string());
                info!(
                    version = migration.version(),
                    name = migration.name(),
                    applied_at = %applied_at,
                    "applied"
                );
            }
            None => {
                info!(
                    version = migration.version(),
                    name = migration.name(),
                    "pending"
                );
            }
        }
    }
    Ok(())
}

// Integration tests below need a local mongod; run them with
// `cargo test -- --ignored` against a scratch deployment.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::helpers::DEFAULT_BATCH_SIZE;
    use mongodb::bson::Document;
    use mongodb::options::ClientOptions;
    use mongodb::Client;

    async fn scratch_ctx(name: &str) -> MigrationContext {
        let uri = std::env::var("MONGODB_TEST_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let options = ClientOptions::parse(&uri).await.expect("parse test URI");
        let client = Client::with_options(options).expect("build test client");
        let db = client.database(name);
        db.drop(None).await.expect("drop scratch database");
        MigrationContext::new(db, DEFAULT_BATCH_SIZE)
    }

    #[tokio::test]
    #[ignore]
    async fn run_is_idempotent() {
        let ctx = scratch_ctx("catalog_migrate_test_runner").await;
        ctx.db
            .collection::<Document>("file")
            .insert_one(
                doc! {"name": "sample.bam", "studyUid": 1_i64, "status": {"name": "READY"}},
                None,
            )
            .await
            .unwrap();

        run_migrations(&ctx).await.unwrap();
        let first = applied_records(&ctx.db).await.unwrap().len();
        run_migrations(&ctx).await.unwrap();
        let second = applied_records(&ctx.db).await.unwrap().len();
        assert_eq!(first, second);

        let file = ctx
            .db
            .collection::<Document>("file")
            .find_one(doc! {"name": "sample.bam"}, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.get_str("_reverse").unwrap(), "mab.elpmas");
    }

    #[tokio::test]
    #[ignore]
    async fn rollback_removes_last_record() {
        let ctx = scratch_ctx("catalog_migrate_test_rollback").await;
        run_migrations(&ctx).await.unwrap();
        let before = applied_records(&ctx.db).await.unwrap().len();
        rollback_last(&ctx).await.unwrap();
        let after = applied_records(&ctx.db).await.unwrap().len();
        assert_eq!(before, after + 1);
    }
}
