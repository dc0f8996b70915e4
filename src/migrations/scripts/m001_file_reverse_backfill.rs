//! Backfills `file._reverse` with the character-reversed file name so suffix
//! lookups can run against an ascending prefix index, then builds that index.
//! `_reverse` is computed once at migration time and is not kept in sync with
//! later renames.

use anyhow::{Context, Result};
use mongodb::bson::{doc, Document};

use crate::metrics::time_step;
use crate::migrations::helpers::{default_index_name, ensure_index, migrate_collection, BulkBatch};
use crate::migrations::{Migration, MigrationContext};

pub struct FileReverseBackfill;

fn reverse_name(name: &str) -> String {
    name.chars().rev().collect()
}

/// Documents that already carry `_reverse` are left alone, even if the value
/// went stale after a rename.
pub(crate) fn backfill_filter() -> Document {
    doc! {"_reverse": {"$exists": false}}
}

pub(crate) fn backfill_sort() -> Document {
    doc! {"name": 1}
}

pub(crate) fn reverse_index_keys() -> Document {
    doc! {"_reverse": 1, "studyUid": 1, "status.name": 1}
}

/// Queue `$set: {_reverse}` for one matched document, keyed by `_id` so each
/// document is updated at most once per run. Documents whose `name` is absent
/// or not a string carry no suffix key and are skipped with a warning.
pub(crate) fn queue_reverse_update(batch: &mut BulkBatch, document: &Document) -> Result<()> {
    match document.get_str("name") {
        Ok(name) => {
            let id = document
                .get("_id")
                .cloned()
                .context("file document without _id")?;
            batch.update_one(
                doc! {"_id": id},
                doc! {"$set": {"_reverse": reverse_name(name)}},
            );
        }
        Err(_) => {
            tracing::warn!(
                id = ?document.get("_id"),
                "file document has a missing or non-string name, skipping"
            );
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl Migration for FileReverseBackfill {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &'static str {
        "file_reverse_name_backfill"
    }

    async fn up(&self, ctx: &MigrationContext) -> Result<()> {
        time_step(
            "file_reverse_backfill",
            "file",
            migrate_collection(
                &ctx.db,
                "file",
                backfill_filter(),
                backfill_sort(),
                ctx.batch_size,
                queue_reverse_update,
            ),
        )
        .await?;
        time_step(
            "file_reverse_index",
            "file",
            ensure_index(&ctx.db, "file", reverse_index_keys()),
        )
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext) -> Result<()> {
        let coll = ctx.db.collection::<Document>("file");
        coll.drop_index(default_index_name(&reverse_index_keys()), None)
            .await
            .context("failed to drop file _reverse index")?;
        coll.update_many(
            doc! {"_reverse": {"$exists": true}},
            doc! {"$unset": {"_reverse": ""}},
            None,
        )
        .await
        .context("failed to unset file._reverse")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverses_file_names() {
        assert_eq!(reverse_name("sample.bam"), "mab.elpmas");
        assert_eq!(reverse_name(""), "");
        // chars, not bytes
        assert_eq!(reverse_name("aé.vcf"), "fcv.éa");
    }

    #[test]
    fn queues_set_by_id() {
        let mut batch = BulkBatch::new("file", 10);
        let document = doc! {"_id": 42_i64, "name": "sample.bam", "studyUid": 7_i64};
        queue_reverse_update(&mut batch, &document).unwrap();
        let queued = batch.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].get_document("q").unwrap(), &doc! {"_id": 42_i64});
        assert_eq!(
            queued[0].get_document("u").unwrap(),
            &doc! {"$set": {"_reverse": "mab.elpmas"}}
        );
    }

    #[test]
    fn skips_documents_without_usable_name() {
        let mut batch = BulkBatch::new("file", 10);
        queue_reverse_update(&mut batch, &doc! {"_id": 1_i64}).unwrap();
        queue_reverse_update(&mut batch, &doc! {"_id": 2_i64, "name": 33_i32}).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn missing_id_is_an_error() {
        let mut batch = BulkBatch::new("file", 10);
        let result = queue_reverse_update(&mut batch, &doc! {"name": "a.bam"});
        assert!(result.is_err());
    }

    #[test]
    fn index_keys_are_ascending() {
        let keys = reverse_index_keys();
        let fields: Vec<&str> = keys.keys().map(|k| k.as_str()).collect();
        assert_eq!(fields, vec!["_reverse", "studyUid", "status.name"]);
        for (_, direction) in keys.iter() {
            assert_eq!(direction.as_i32(), Some(1));
        }
    }

    // Needs a local mongod; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn backfill_skips_existing_reverse_and_reruns_clean() {
        use mongodb::options::ClientOptions;
        use mongodb::Client;

        let uri = std::env::var("MONGODB_TEST_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let options = ClientOptions::parse(&uri).await.expect("parse test URI");
        let client = Client::with_options(options).expect("build test client");
        let db = client.database("catalog_migrate_test_backfill");
        db.drop(None).await.expect("drop scratch database");

        let files = db.collection::<Document>("file");
        files
            .insert_many(
                vec![
                    doc! {"_id": 1_i64, "name": "sample.bam", "studyUid": 1_i64, "status": {"name": "READY"}},
                    // Stale on purpose: not the reverse of "old.bam".
                    doc! {"_id": 2_i64, "name": "old.bam", "_reverse": "stale", "studyUid": 1_i64, "status": {"name": "READY"}},
                ],
                None,
            )
            .await
            .unwrap();

        // A batch size of one forces a flush per matched document.
        let ctx = MigrationContext::new(db.clone(), 1);
        FileReverseBackfill.up(&ctx).await.unwrap();

        let filled = files
            .find_one(doc! {"_id": 1_i64}, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(filled.get_str("_reverse").unwrap(), "mab.elpmas");

        // A pre-existing _reverse is excluded by the filter and untouched.
        let stale = files
            .find_one(doc! {"_id": 2_i64}, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.get_str("_reverse").unwrap(), "stale");

        // Second pass matches nothing and updates nothing.
        FileReverseBackfill.up(&ctx).await.unwrap();
        let stats = migrate_collection(
            &db,
            "file",
            backfill_filter(),
            backfill_sort(),
            ctx.batch_size,
            queue_reverse_update,
        )
        .await
        .unwrap();
        assert_eq!(stats.scanned, 0);
        assert_eq!(stats.updated, 0);
    }
}
