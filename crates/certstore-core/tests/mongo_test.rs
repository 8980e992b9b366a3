// Integration tests against a live MongoDB
// Run with CERTSTORE_TEST_MONGO_URI set and `--features mongo -- --ignored`

#![cfg(feature = "mongo")]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use certstore_core::{
    CancellationToken, CertificateStorage, LockOptions, RetryPolicy, Storage, StorageOptions,
};
use certstore_persistence::mongodb::Client;
use certstore_persistence::{MongoPersistService, PersistenceService};

fn mongo_uri() -> String {
    std::env::var("CERTSTORE_TEST_MONGO_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

fn options(database: &str, instance: &str) -> StorageOptions {
    StorageOptions::default()
        .with_database(database)
        .with_instance_id(instance)
        .with_lock(
            LockOptions::default().with_retry(RetryPolicy::fixed(Duration::from_millis(100))),
        )
}

async fn scratch_database() -> (Client, String) {
    let client = Client::with_uri_str(mongo_uri()).await.unwrap();
    let database = format!("certstore_test_{}", Utc::now().timestamp_millis());
    (client, database)
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn test_mongo_record_roundtrip() {
    let (client, database) = scratch_database().await;
    let backend = Arc::new(MongoPersistService::new(&client, &database));
    backend.health_check().await.unwrap();
    let storage = CertificateStorage::new(backend, options(&database, "node-a"))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    for key in ["a/1", "a/2", "b/1", "a.b"] {
        storage.store(key, key.as_bytes(), &cancel).await.unwrap();
    }
    assert_eq!(storage.load("a/2", &cancel).await.unwrap(), b"a/2");
    assert_eq!(storage.list("a/", true, &cancel).await.unwrap().len(), 2);
    assert_eq!(storage.list("a.", true, &cancel).await.unwrap(), vec!["a.b"]);
    assert!(storage.load("missing", &cancel).await.unwrap_err().is_not_found());

    storage.delete("a/1", &cancel).await.unwrap();
    storage.delete("a/1", &cancel).await.unwrap();
    assert!(!storage.exists("a/1", &cancel).await);

    client.database(&database).drop().await.unwrap();
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn test_mongo_lock_conflict_and_scoping() {
    let (client, database) = scratch_database().await;
    let p1 = CertificateStorage::new(
        Arc::new(MongoPersistService::new(&client, &database)),
        options(&database, "p1"),
    )
    .await
    .unwrap();
    let p2 = CertificateStorage::from_mongo_client(&client, options(&database, "p2"))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    assert!(p1.try_lock("cert-x", &cancel).await.unwrap());
    assert!(!p2.try_lock("cert-x", &cancel).await.unwrap());
    assert!(p2.unlock("cert-x", &cancel).await.unwrap_err().is_release_mismatch());

    p1.unlock("cert-x", &cancel).await.unwrap();
    assert!(p2.try_lock("cert-x", &cancel).await.unwrap());
    p2.unlock("cert-x", &cancel).await.unwrap();

    client.database(&database).drop().await.unwrap();
}
