// Migration trait and registry for MongoDB catalog migrations
use anyhow::Result;
use mongodb::Database;

/// Shared state handed to every migration: the target database handle plus
/// the tunables the scripts need, built once in `main` from `AppConfig`.
pub struct MigrationContext {
    pub db: Database,
    pub batch_size: usize,
}

impl MigrationContext {
    pub fn new(db: Database, batch_size: usize) -> Self {
        Self { db, batch_size }
    }
}

#[async_trait::async_trait]
pub trait Migration {
    fn version(&self) -> i64;
    fn name(&self) -> &'static str;
    async fn up(&self, ctx: &MigrationContext) -> Result<()>;
    async fn down(&self, ctx: &MigrationContext) -> Result<()>;
}

pub mod helpers;
pub mod runner;
pub mod scripts;

// Registry of all migrations, in application order
pub fn all_migrations() -> Vec<Box<dyn Migration + Send + Sync>> {
    vec![
        Box::new(scripts::m001_file_reverse_backfill::FileReverseBackfill),
        Box::new(scripts::m002_date_query_indexes::DateQueryIndexes),
        // Add more migrations here as needed
    ]
}
