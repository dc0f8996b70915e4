//! Compound creation/modification-date indexes for the catalog collections
//! that are filtered by study and status in date-ordered listings.

use anyhow::{Context, Result};
use mongodb::bson::{doc, Document};

use crate::metrics::time_step;
use crate::migrations::helpers::{default_index_name, ensure_index};
use crate::migrations::{Migration, MigrationContext};

pub(crate) const INDEXED_COLLECTIONS: &[&str] = &[
    "job",
    "file",
    "sample",
    "individual",
    "cohort",
    "family",
    "diseasePanel",
];

const DATE_FIELDS: &[&str] = &["_creationDate", "_modificationDate"];

pub struct DateQueryIndexes;

pub(crate) fn date_index_keys(field: &str) -> Document {
    doc! {field: 1, "studyUid": 1, "status.name": 1}
}

#[async_trait::async_trait]
impl Migration for DateQueryIndexes {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &'static str {
        "date_query_indexes"
    }

    async fn up(&self, ctx: &MigrationContext) -> Result<()> {
        for &collection in INDEXED_COLLECTIONS {
            time_step("date_query_indexes", collection, async {
                for &field in DATE_FIELDS {
                    ensure_index(&ctx.db, collection, date_index_keys(field)).await?;
                }
                Ok::<_, anyhow::Error>(())
            })
            .await?;
        }
        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext) -> Result<()> {
        for &collection in INDEXED_COLLECTIONS {
            let coll = ctx.db.collection::<Document>(collection);
            for &field in DATE_FIELDS {
                coll.drop_index(default_index_name(&date_index_keys(field)), None)
                    .await
                    .with_context(|| {
                        format!("failed to drop {} index on '{}'", field, collection)
                    })?;
            }
        }
        Ok(())
    }
}
