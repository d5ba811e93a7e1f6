#![allow(clippy::unwrap_used)]

use super::{
    Collection, Comparison, Filter, ListQuery, MemoryBackend, ObjectStoreBackend, Sort,
    StorageBackend, StorageConfig, StorageError,
};
use cairn_types::Record;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn bookmarks() -> Collection {
    Collection::new("bookmark").with_unique_fields(["url"])
}

fn record(value: serde_json::Value) -> Record {
    Record::try_from(value).unwrap()
}

fn create_local_backend() -> (ObjectStoreBackend, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::Local {
        path: temp_dir.path().to_path_buf(),
    };
    let backend = ObjectStoreBackend::from_config(&config).unwrap();
    (backend, temp_dir)
}

async fn check_create_and_get(backend: &dyn StorageBackend) {
    let collection = bookmarks();
    let created = backend
        .create(&collection, record(json!({"url": "http://mozilla.org"})))
        .await
        .unwrap();

    let id = created.id().unwrap().to_string();
    assert!(created.last_modified().is_some());

    let fetched = backend.get(&collection, &id).await.unwrap();
    assert_eq!(fetched, created);
}

async fn check_unique_field_conflict(backend: &dyn StorageBackend) {
    let collection = bookmarks();
    let first = backend
        .create(&collection, record(json!({"url": "http://mozilla.org"})))
        .await
        .unwrap();

    let result = backend
        .create(&collection, record(json!({"url": "http://mozilla.org"})))
        .await;
    match result {
        Err(StorageError::Unicity { field, record }) => {
            assert_eq!(field, "url");
            assert_eq!(record, first);
        }
        other => panic!("expected a unicity error, got {other:?}"),
    }
}

async fn check_duplicate_id_conflict(backend: &dyn StorageBackend) {
    let collection = bookmarks();
    backend
        .create(&collection, record(json!({"id": "abc", "url": "http://a.org"})))
        .await
        .unwrap();

    let result = backend
        .create(&collection, record(json!({"id": "abc", "url": "http://b.org"})))
        .await;
    assert!(matches!(result, Err(StorageError::Unicity { field, .. }) if field == "id"));
}

async fn check_delete_frees_unique_value(backend: &dyn StorageBackend) {
    let collection = bookmarks();
    let first = backend
        .create(&collection, record(json!({"url": "http://mozilla.org"})))
        .await
        .unwrap();
    let id = first.id().unwrap();

    let tombstone = backend.delete(&collection, id, None).await.unwrap();
    assert!(tombstone.is_deleted());
    assert!(tombstone.last_modified() > first.last_modified());
    assert!(matches!(
        backend.get(&collection, id).await,
        Err(StorageError::RecordNotFound { .. })
    ));
    assert!(matches!(
        backend.delete(&collection, id, None).await,
        Err(StorageError::RecordNotFound { .. })
    ));

    backend
        .create(&collection, record(json!({"url": "http://mozilla.org"})))
        .await
        .unwrap();
}

async fn check_update_conflicts_only_with_other_records(backend: &dyn StorageBackend) {
    let collection = bookmarks();
    let first = backend
        .create(&collection, record(json!({"url": "http://a.org", "title": "A"})))
        .await
        .unwrap();
    backend
        .create(&collection, record(json!({"url": "http://b.org"})))
        .await
        .unwrap();
    let id = first.id().unwrap();

    let renamed = backend
        .update(
            &collection,
            id,
            record(json!({"url": "http://a.org", "title": "Renamed"})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(renamed.get("title"), Some(&json!("Renamed")));

    let result = backend
        .update(&collection, id, record(json!({"url": "http://b.org"})), None)
        .await;
    assert!(matches!(result, Err(StorageError::Unicity { field, .. }) if field == "url"));

    let missing = backend
        .update(&collection, "unknown", record(json!({"url": "http://c.org"})), None)
        .await;
    assert!(matches!(missing, Err(StorageError::RecordNotFound { .. })));
}

async fn check_version_preconditions(backend: &dyn StorageBackend) {
    let collection = bookmarks();
    let v1 = backend
        .create(&collection, record(json!({"url": "http://a.org"})))
        .await
        .unwrap();
    let id = v1.id().unwrap();
    let v2 = backend
        .update(
            &collection,
            id,
            record(json!({"url": "http://a.org", "n": 2})),
            v1.last_modified(),
        )
        .await
        .unwrap();
    assert!(v2.last_modified() > v1.last_modified());

    let stale = backend
        .update(
            &collection,
            id,
            record(json!({"url": "http://a.org", "n": 3})),
            v1.last_modified(),
        )
        .await;
    assert!(matches!(
        stale,
        Err(StorageError::ModifiedMeanwhile { current }) if Some(current) == v2.last_modified()
    ));

    let stale_delete = backend.delete(&collection, id, v1.last_modified()).await;
    assert!(matches!(stale_delete, Err(StorageError::ModifiedMeanwhile { .. })));

    assert_eq!(backend.get(&collection, id).await.unwrap(), v2);
}

async fn check_timestamps_are_strictly_increasing(backend: &dyn StorageBackend) {
    let collection = Collection::new("mushroom");
    let mut previous = 0;
    for i in 0..20 {
        let created = backend
            .create(&collection, record(json!({"name": format!("m{i}")})))
            .await
            .unwrap();
        let timestamp = created.last_modified().unwrap();
        assert!(timestamp > previous);
        previous = timestamp;
    }
    assert_eq!(
        backend.collection_timestamp(&collection).await.unwrap(),
        previous
    );
}

async fn check_listing(backend: &dyn StorageBackend) {
    let collection = Collection::new("mushroom");
    for (name, size) in [("Morel", 12), ("Cep", 4), ("Chanterelle", 7)] {
        backend
            .create(&collection, record(json!({"name": name, "size": size})))
            .await
            .unwrap();
    }

    let query = ListQuery {
        filters: vec![Filter::new("size", 5, Comparison::Min)],
        sorting: vec![Sort::asc("size")],
        ..ListQuery::default()
    };
    let (records, total) = backend.get_all(&collection, &query).await.unwrap();
    assert_eq!(total, 2);
    let names: Vec<_> = records.iter().filter_map(|r| r.get("name")).collect();
    assert_eq!(names, vec![&json!("Chanterelle"), &json!("Morel")]);

    let deleted = backend
        .delete_all(&collection, &[Filter::new("name", "Cep", Comparison::Eq)])
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);

    let (live, total) = backend
        .get_all(&collection, &ListQuery::default())
        .await
        .unwrap();
    assert_eq!((live.len(), total), (2, 2));

    let with_tombstones = ListQuery {
        include_deleted: true,
        ..ListQuery::default()
    };
    let (all, _) = backend.get_all(&collection, &with_tombstones).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.iter().filter(|r| r.is_deleted()).count(), 1);
}

async fn check_delete_all_resumes_after_partial_run(backend: &dyn StorageBackend) {
    let collection = Collection::new("entry");
    let mut cached = Vec::new();
    for kind in ["cache", "cache", "session", "cache"] {
        let created = backend
            .create(&collection, record(json!({"kind": kind})))
            .await
            .unwrap();
        if kind == "cache" {
            cached.push(created);
        }
    }
    let filters = [Filter::new("kind", "cache", Comparison::Eq)];

    // First matching record already tombstoned by an interrupted run
    backend
        .delete(&collection, cached[0].id().unwrap(), None)
        .await
        .unwrap();

    let deleted = backend.delete_all(&collection, &filters).await.unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(deleted.iter().all(|r| r.is_deleted()));
    assert!(deleted.iter().all(|r| r.id() != cached[0].id()));

    assert!(backend.delete_all(&collection, &filters).await.unwrap().is_empty());
    let (live, _) = backend
        .get_all(&collection, &ListQuery::default())
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].get("kind"), Some(&json!("session")));
}

async fn check_concurrent_creates_single_winner(backend: Arc<dyn StorageBackend>) {
    let collection = bookmarks();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let backend = Arc::clone(&backend);
        let collection = collection.clone();
        handles.push(tokio::spawn(async move {
            backend
                .create(&collection, record(json!({"url": "http://mozilla.org"})))
                .await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(StorageError::Unicity { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 15);
}

#[tokio::test]
async fn test_memory_create_and_get() {
    check_create_and_get(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_unique_field_conflict() {
    check_unique_field_conflict(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_duplicate_id_conflict() {
    check_duplicate_id_conflict(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_delete_frees_unique_value() {
    check_delete_frees_unique_value(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_update_conflicts() {
    check_update_conflicts_only_with_other_records(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_version_preconditions() {
    check_version_preconditions(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_timestamps() {
    check_timestamps_are_strictly_increasing(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_listing() {
    check_listing(&MemoryBackend::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_creates() {
    check_concurrent_creates_single_winner(Arc::new(MemoryBackend::new())).await;
}

#[tokio::test]
async fn test_memory_delete_all_resumes() {
    check_delete_all_resumes_after_partial_run(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn test_memory_flush() {
    let backend = MemoryBackend::new();
    check_create_and_get(&backend).await;
    backend.flush().await.unwrap();
    let (records, _) = backend
        .get_all(&bookmarks(), &ListQuery::default())
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_local_create_and_get() {
    let (backend, _dir) = create_local_backend();
    check_create_and_get(&backend).await;
}

#[tokio::test]
async fn test_local_unique_field_conflict() {
    let (backend, _dir) = create_local_backend();
    check_unique_field_conflict(&backend).await;
}

#[tokio::test]
async fn test_local_duplicate_id_conflict() {
    let (backend, _dir) = create_local_backend();
    check_duplicate_id_conflict(&backend).await;
}

#[tokio::test]
async fn test_local_delete_frees_unique_value() {
    let (backend, _dir) = create_local_backend();
    check_delete_frees_unique_value(&backend).await;
}

#[tokio::test]
async fn test_local_update_conflicts() {
    let (backend, _dir) = create_local_backend();
    check_update_conflicts_only_with_other_records(&backend).await;
}

#[tokio::test]
async fn test_local_version_preconditions() {
    let (backend, _dir) = create_local_backend();
    check_version_preconditions(&backend).await;
}

#[tokio::test]
async fn test_local_timestamps() {
    let (backend, _dir) = create_local_backend();
    check_timestamps_are_strictly_increasing(&backend).await;
}

#[tokio::test]
async fn test_local_listing() {
    let (backend, _dir) = create_local_backend();
    check_listing(&backend).await;
}

#[tokio::test]
async fn test_local_delete_all_resumes() {
    let (backend, _dir) = create_local_backend();
    check_delete_all_resumes_after_partial_run(&backend).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_concurrent_creates() {
    let (backend, _dir) = create_local_backend();
    check_concurrent_creates_single_winner(Arc::new(backend)).await;
}

#[tokio::test]
async fn test_in_memory_object_store_backend() {
    let backend = ObjectStoreBackend::from_config(&StorageConfig::Memory).unwrap();
    check_unique_field_conflict(&backend).await;
    assert!(backend.ping().await.is_ok());

    let backend = ObjectStoreBackend::from_config(&StorageConfig::Memory).unwrap();
    check_delete_frees_unique_value(&backend).await;
}

#[tokio::test]
async fn test_local_records_survive_a_new_instance() {
    let (backend, dir) = create_local_backend();
    let created = backend
        .create(&bookmarks(), record(json!({"url": "http://mozilla.org"})))
        .await
        .unwrap();
    drop(backend);

    let reopened = ObjectStoreBackend::from_config(&StorageConfig::local(dir.path())).unwrap();
    let fetched = reopened
        .get(&bookmarks(), created.id().unwrap())
        .await
        .unwrap();
    assert_eq!(fetched, created);
}
