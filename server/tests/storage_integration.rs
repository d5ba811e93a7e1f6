use anyhow::Result;
use cairn_server::catalog;
use cairn_server::id::IdGeneratorKind;
use cairn_server::resource::{ListRequest, ResourceController, ResourceError};
use cairn_server::storage::{
    BackendRegistry, Comparison, Filter, KeyValueStore, StorageBackend, StorageConfig,
};
use cairn_types::Record;
use futures::TryStreamExt;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Local Storage Tests
// ============================================================================

fn local_backend(dir: &TempDir) -> Result<Arc<dyn StorageBackend>> {
    let path = dir.path().to_string_lossy().to_string();
    let config = StorageConfig::from_lookup(|name| match name {
        "STORAGE_BACKEND" => Some("local".to_string()),
        "STORAGE_PATH" => Some(path.clone()),
        _ => None,
    })?;
    BackendRegistry::with_defaults().build(&config)
}

fn bookmarks(storage: Arc<dyn StorageBackend>) -> ResourceController {
    ResourceController::new(catalog::bookmark(), storage, IdGeneratorKind::Uuid4.build())
}

fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[tokio::test]
async fn test_local_records_and_constraints_survive_restart() -> Result<()> {
    let dir = TempDir::new()?;

    let first = bookmarks(local_backend(&dir)?);
    let created = first
        .create(json!({"url": "http://mozilla.org"}))
        .await?
        .into_record();
    let id = created.id().unwrap_or_default().to_string();
    let timestamp = first.timestamp().await?;
    drop(first);

    // A new process over the same directory
    let second = bookmarks(local_backend(&dir)?);
    assert_eq!(second.get(&id).await?, created);
    assert_eq!(second.timestamp().await?, timestamp);

    let err = second
        .create(json!({"url": "http://mozilla.org"}))
        .await
        .err();
    assert!(matches!(err, Some(ResourceError::Conflict { ref field, .. }) if field == "url"));

    let next = second
        .create(json!({"url": "http://example.com"}))
        .await?
        .into_record();
    assert!(next.last_modified() > created.last_modified());
    Ok(())
}

#[tokio::test]
async fn test_local_stale_write_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let resource = bookmarks(local_backend(&dir)?);

    let created = resource
        .create(json!({"url": "http://mozilla.org"}))
        .await?
        .into_record();
    let id = created.id().unwrap_or_default().to_string();
    let version = created.last_modified();

    resource
        .patch(&id, json!({"title": "Mozilla"}), version)
        .await?;
    let stale = resource
        .patch(&id, json!({"title": "Firefox"}), version)
        .await;
    assert!(matches!(stale, Err(ResourceError::PreconditionFailed)));

    let current = resource.get(&id).await?;
    assert_eq!(current.get("title"), Some(&json!("Mozilla")));
    Ok(())
}

#[tokio::test]
async fn test_local_polling_for_changes() -> Result<()> {
    let dir = TempDir::new()?;
    let resource = bookmarks(local_backend(&dir)?);

    let kept = resource
        .create(json!({"url": "http://a.org"}))
        .await?
        .into_record();
    let removed = resource
        .create(json!({"url": "http://b.org"}))
        .await?
        .into_record();
    let since = resource.timestamp().await?;

    resource
        .delete(removed.id().unwrap_or_default(), None)
        .await?;
    resource
        .patch(kept.id().unwrap_or_default(), json!({"archived": true}), None)
        .await?;

    let since = since.to_string();
    let request = ListRequest::from_params(
        &params(&[("_since", &since), ("_sort", "last_modified")]),
        &resource.known_fields(),
        None,
    )?;
    let changes: Vec<Record> = resource.stream(request, 1).try_collect().await?;

    assert_eq!(changes.len(), 2);
    assert!(changes[0].is_deleted());
    assert_eq!(changes[0].id(), removed.id());
    assert_eq!(changes[1].get("archived"), Some(&json!(true)));
    Ok(())
}

#[tokio::test]
async fn test_local_keyvalue_store() -> Result<()> {
    let dir = TempDir::new()?;
    let store = KeyValueStore::new(local_backend(&dir)?);
    store.ping().await?;

    let mut value = Record::new();
    value.insert("state", "running");
    value.insert("attempts", 1);
    store.set("job-1", value.clone()).await?;

    value.insert("attempts", 2);
    let stored = store.set("job-1", value).await?;
    assert_eq!(stored.id(), Some("job-1"));
    assert_eq!(store.get("job-1").await?.get("attempts"), Some(&json!(2)));

    let mut other = Record::new();
    other.insert("state", "done");
    store.set("job-2", other).await?;

    let running = store
        .find(vec![Filter::new("state", "running", Comparison::Eq)])
        .await?;
    assert_eq!(running.len(), 1);

    store.delete("job-1").await?;
    assert!(store.get("job-1").await.is_err());
    assert_eq!(store.flush().await?.len(), 1);
    Ok(())
}
