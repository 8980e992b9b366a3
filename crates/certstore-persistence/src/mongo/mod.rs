// MongoDB persistence backend
// Shares the storage and lock collections between every cooperating process.
// Lock expiry is delegated to the server's TTL monitor through an index on
// `expires_at` with a zero grace period.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{Binary, Bson, DateTime as BsonDateTime, Document, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{debug, info};

use certstore_common::{LOCKS_COLLECTION, STORAGE_COLLECTION};

use crate::model::{InsertOutcome, LockDocument, RecordDocument, StorageMode};
use crate::traits::{LockPersistence, PersistenceService, RecordPersistence};

/// Server error code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed persistence
///
/// Connection pooling, authentication and the wire protocol are handled by the
/// driver; this type only shapes documents and queries.
#[derive(Clone)]
pub struct MongoPersistService {
    database: Database,
    records: Collection<Document>,
    locks: Collection<Document>,
}

impl MongoPersistService {
    /// Create from a live client handle and a database name
    pub fn new(client: &Client, database: &str) -> Self {
        let database = client.database(database);
        Self {
            records: database.collection::<Document>(STORAGE_COLLECTION),
            locks: database.collection::<Document>(LOCKS_COLLECTION),
            database,
        }
    }

    /// Connect to `uri` and open `database`
    pub async fn connect(uri: &str, database: &str) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        info!(database = %database, "Connected to MongoDB");
        Ok(Self::new(&client, database))
    }
}

fn to_bson_datetime(value: DateTime<Utc>) -> Bson {
    Bson::DateTime(BsonDateTime::from_millis(value.timestamp_millis()))
}

fn from_bson_datetime(value: &BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value.timestamp_millis()).unwrap_or_default()
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        _ => false,
    }
}

/// Anchored pattern matching `prefix` literally
fn prefix_pattern(prefix: &str) -> String {
    format!("^{}", regex::escape(prefix))
}

fn record_from_document(document: &Document) -> anyhow::Result<RecordDocument> {
    Ok(RecordDocument {
        key: document.get_str("key")?.to_string(),
        value: document.get_binary_generic("value")?.clone(),
        modified_at: from_bson_datetime(document.get_datetime("ts")?),
    })
}

fn lock_from_document(document: &Document) -> anyhow::Result<LockDocument> {
    Ok(LockDocument {
        key: document.get_str("key")?.to_string(),
        instance: document.get_str("instance")?.to_string(),
        expires_at: from_bson_datetime(document.get_datetime("expires_at")?),
    })
}

fn unique_key_index() -> IndexModel {
    IndexModel::builder()
        .keys(doc! { "key": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

#[async_trait]
impl RecordPersistence for MongoPersistService {
    async fn record_upsert(
        &self,
        key: &str,
        value: &[u8],
        modified_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let value = Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: value.to_vec(),
        });
        let ts = to_bson_datetime(modified_at);

        self.records
            .update_one(
                doc! { "key": key },
                doc! { "$set": { "key": key, "value": value, "ts": ts } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn record_find_one(&self, key: &str) -> anyhow::Result<Option<RecordDocument>> {
        match self.records.find_one(doc! { "key": key }).await? {
            Some(document) => Ok(Some(record_from_document(&document)?)),
            None => Ok(None),
        }
    }

    async fn record_delete(&self, key: &str) -> anyhow::Result<u64> {
        let result = self.records.delete_one(doc! { "key": key }).await?;
        Ok(result.deleted_count)
    }

    async fn record_count(&self, key: &str) -> anyhow::Result<u64> {
        Ok(self.records.count_documents(doc! { "key": key }).await?)
    }

    async fn record_keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let pattern = prefix_pattern(prefix);
        let mut cursor = self
            .records
            .find(doc! { "key": { "$regex": pattern } })
            .projection(doc! { "key": 1 })
            .await?;

        let mut keys = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            match document.get_str("key") {
                Ok(key) => keys.push(key.to_string()),
                Err(e) => debug!(error = %e, "Skipping storage document without a string key"),
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl LockPersistence for MongoPersistService {
    async fn lock_insert(&self, lock: &LockDocument) -> anyhow::Result<InsertOutcome> {
        let document = doc! {
            "key": lock.key.as_str(),
            "instance": lock.instance.as_str(),
            "expires_at": to_bson_datetime(lock.expires_at),
        };

        match self.locks.insert_one(document).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_duplicate_key(&e) => Ok(InsertOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_delete(&self, key: &str, instance: &str) -> anyhow::Result<u64> {
        let result = self
            .locks
            .delete_one(doc! { "key": key, "instance": instance })
            .await?;
        Ok(result.deleted_count)
    }

    async fn lock_find_one(&self, key: &str) -> anyhow::Result<Option<LockDocument>> {
        match self.locks.find_one(doc! { "key": key }).await? {
            Some(document) => Ok(Some(lock_from_document(&document)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PersistenceService for MongoPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Mongo
    }

    async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let expiry_index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();

        self.locks
            .create_indexes(vec![unique_key_index(), expiry_index])
            .await?;
        self.records.create_index(unique_key_index()).await?;

        info!(
            storage = STORAGE_COLLECTION,
            locks = LOCKS_COLLECTION,
            "MongoDB indexes ensured"
        );
        Ok(())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
