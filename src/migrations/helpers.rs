//! Bulk-migration helpers shared by migration scripts: cursor-driven
//! collection rewrites with batched updates, and background index creation.

use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Database, IndexModel};
use thiserror::Error;
use tracing::{debug, info};

/// Pending updates a batch holds before `migrate_collection` flushes it.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("bulk write on '{collection}' failed at index {index} (code {code}): {message}")]
    Write {
        collection: String,
        index: i64,
        code: i64,
        message: String,
    },
    #[error("malformed reply to update command on '{collection}'")]
    MalformedReply { collection: String },
}

/// Accumulates `updateOne` statements for a single collection. Flushed by the
/// owning `migrate_collection` loop as one raw `update` command per batch,
/// with `ordered: true` so the first failing statement aborts the run.
pub struct BulkBatch {
    collection: String,
    updates: Vec<Document>,
    batch_size: usize,
}

impl BulkBatch {
    pub fn new(collection: impl Into<String>, batch_size: usize) -> Self {
        Self {
            collection: collection.into(),
            updates: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Queue an update of a single document matching `filter`.
    pub fn update_one(&mut self, filter: Document, update: Document) {
        self.updates.push(doc! {
            "q": filter,
            "u": update,
            "multi": false,
            "upsert": false,
        });
    }

    /// Statements queued since the last flush.
    pub fn queued(&self) -> &[Document] {
        &self.updates
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    fn is_full(&self) -> bool {
        self.updates.len() >= self.batch_size
    }

    fn take_command(&mut self) -> Document {
        doc! {
            "update": &self.collection,
            "updates": std::mem::take(&mut self.updates),
            "ordered": true,
        }
    }

    async fn flush(&mut self, db: &Database) -> Result<u64> {
        if self.is_empty() {
            return Ok(0);
        }
        let queued = self.len();
        let command = self.take_command();
        let reply = db
            .run_command(command, None)
            .await
            .with_context(|| format!("update command on '{}' failed", self.collection))?;
        check_write_errors(&self.collection, &reply)?;
        let modified = int_field(&reply, "nModified").unwrap_or(0).max(0) as u64;
        debug!(
            collection = %self.collection,
            queued,
            modified,
            "Flushed update batch"
        );
        Ok(modified)
    }
}

/// Surface the first entry of a reply's `writeErrors`. The field may be
/// absent or an empty array; both mean every statement applied.
fn check_write_errors(collection: &str, reply: &Document) -> Result<(), BulkError> {
    let errors = match reply.get_array("writeErrors") {
        Ok(errors) => errors,
        Err(_) => return Ok(()),
    };
    let first = match errors.first() {
        Some(first) => first,
        None => return Ok(()),
    };
    let first = first.as_document().ok_or_else(|| BulkError::MalformedReply {
        collection: collection.to_string(),
    })?;
    Err(BulkError::Write {
        collection: collection.to_string(),
        index: int_field(first, "index").unwrap_or(-1),
        code: int_field(first, "code").unwrap_or(-1),
        message: first.get_str("errmsg").unwrap_or("unknown error").to_string(),
    })
}

// The server replies with int32 or int64 depending on version.
fn int_field(doc: &Document, key: &str) -> Option<i64> {
    doc.get_i64(key)
        .ok()
        .or_else(|| doc.get_i32(key).ok().map(i64::from))
}

/// Outcome of a `migrate_collection` pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct MigrateStats {
    /// Documents the cursor visited.
    pub scanned: u64,
    /// Documents the server reports as modified.
    pub updated: u64,
}

/// Apply `apply` to every document of `collection` matching `filter`, visiting
/// documents in `sort` order. The callback queues writes on the supplied
/// [`BulkBatch`]; batches are flushed every `batch_size` documents and once
/// more at the end. Any server-side write error aborts on first failure.
pub async fn migrate_collection<F>(
    db: &Database,
    collection: &str,
    filter: Document,
    sort: Document,
    batch_size: usize,
    mut apply: F,
) -> Result<MigrateStats>
where
    F: FnMut(&mut BulkBatch, &Document) -> Result<()>,
{
    let coll = db.collection::<Document>(collection);
    let options = FindOptions::builder().sort(sort).build();
    let mut cursor = coll
        .find(filter, options)
        .await
        .with_context(|| format!("failed to open cursor on '{}'", collection))?;

    let mut batch = BulkBatch::new(collection, batch_size);
    let mut stats = MigrateStats::default();
    while let Some(document) = cursor
        .try_next()
        .await
        .with_context(|| format!("cursor on '{}' failed", collection))?
    {
        stats.scanned += 1;
        apply(&mut batch, &document)?;
        if batch.is_full() {
            stats.updated += batch.flush(db).await?;
        }
    }
    stats.updated += batch.flush(db).await?;
    info!(
        collection,
        scanned = stats.scanned,
        updated = stats.updated,
        "Collection migration pass finished"
    );
    Ok(stats)
}

/// Ensure a compound index with the given ascending key spec exists, built in
/// the background so concurrent readers and writers are not blocked. Creating
/// an index that already exists with the same spec is a server-side no-op; a
/// conflicting spec under the same name surfaces as an error.
pub async fn ensure_index(db: &Database, collection: &str, keys: Document) -> Result<String> {
    let index_model = IndexModel::builder()
        .keys(keys.clone())
        .options(IndexOptions::builder().background(true).build())
        .build();
    let result = db
        .collection::<Document>(collection)
        .create_index(index_model, None)
        .await
        .with_context(|| format!("failed to create index {:?} on '{}'", keys, collection))?;
    debug!(collection, index = %result.index_name, "Index ensured");
    Ok(result.index_name)
}

/// Name the server assigns to an index created without an explicit name.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction))
        .collect::<Vec<_>>()
        .join("_")
}
