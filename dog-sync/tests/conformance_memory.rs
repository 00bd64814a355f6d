use chrono::{Duration, Utc};
use serde_json::json;

use dog_sync::{
    ItemId, ItemStatus, NewItem, QueueStatus, RunConfig, SyncError, TenantId,
    store::{MemoryQueueStore, NewQueue, QueueStore, MAX_QUEUE_ITEMS},
    types::{ItemUpdate, QueueId, QueuePatch},
};

/// Test factory functions
fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

fn create_test_queue(items: usize) -> NewQueue {
    let items = (0..items)
        .map(|i| NewItem::update(format!("ext-{i}"), json!({ "n": i })))
        .collect();
    NewQueue::new("product", RunConfig::default(), items)
}

async fn start(store: &MemoryQueueStore, tenant: &TenantId, queue_id: &QueueId) {
    store
        .update_queue_status(tenant, queue_id, QueuePatch::status(QueueStatus::Processing).with_started_at(Utc::now()))
        .await
        .unwrap();
}

/// S1. Creation Persists Header And Pending Items
#[tokio::test]
async fn test_create_persists_header_and_pending_items() {
    let store = MemoryQueueStore::new();
    let acme = tenant("acme");

    let queue_id = store.create_queue(&acme, create_test_queue(7)).await.unwrap();

    let queue = store.get_queue(&acme, &queue_id).await.unwrap().unwrap();
    assert_eq!(queue.status, QueueStatus::Pending);
    assert_eq!(queue.total_items, 7);
    assert_eq!((queue.processed_items, queue.failed_items, queue.progress), (0, 0, 0));
    assert!(queue.started_at.is_none());

    let items = store.list_items(&acme, &queue_id).await.unwrap();
    assert_eq!(items.len(), 7);
    assert!(items.iter().all(|i| i.status == ItemStatus::Pending && i.retry_count == 0));
    assert!(items.iter().all(|i| i.queue_id == queue_id && i.tenant_id == acme));
}

/// S2. Item Count Bounds Are Enforced By The Store
#[tokio::test]
async fn test_item_count_bounds() {
    let store = MemoryQueueStore::new();
    let acme = tenant("acme");

    assert_eq!(
        store.create_queue(&acme, create_test_queue(0)).await.unwrap_err(),
        SyncError::EmptyQueue
    );
    assert!(matches!(
        store.create_queue(&acme, create_test_queue(MAX_QUEUE_ITEMS + 1)).await,
        Err(SyncError::TooManyItems { count: 10_001, max: 10_000 })
    ));
    assert!(store.create_queue(&acme, create_test_queue(MAX_QUEUE_ITEMS)).await.is_ok());
}

/// S3. Fetch Skips Items That Are Backing Off
#[tokio::test]
async fn test_fetch_skips_items_backing_off() {
    let store = MemoryQueueStore::new();
    let acme = tenant("acme");
    let queue_id = store.create_queue(&acme, create_test_queue(3)).await.unwrap();
    start(&store, &acme, &queue_id).await;

    let now = Utc::now();
    let items = store.list_items(&acme, &queue_id).await.unwrap();
    let retry_at = now + Duration::seconds(30);

    // Arrange: first item fails once and backs off for 30s
    store
        .update_items(&acme, &queue_id, vec![ItemUpdate::retry(&items[0], "timeout".into(), retry_at)])
        .await
        .unwrap();

    // Act + Assert: not due yet
    let due = store.fetch_pending_items(&acme, &queue_id, 10, now).await.unwrap();
    let ids: Vec<_> = due.iter().map(|i| i.external_id.as_str()).collect();
    assert_eq!(ids, vec!["ext-1", "ext-2"]);
    assert_eq!(store.next_attempt_at(&acme, &queue_id).await.unwrap(), Some(retry_at));

    // Due again once the backoff has elapsed, still in insertion order
    let later = store
        .fetch_pending_items(&acme, &queue_id, 10, retry_at)
        .await
        .unwrap();
    assert_eq!(later.first().map(|i| i.external_id.as_str()), Some("ext-0"));
}

/// S4. Counts Follow Item Status
#[tokio::test]
async fn test_counts_follow_item_status() {
    let store = MemoryQueueStore::new();
    let acme = tenant("acme");
    let queue_id = store.create_queue(&acme, create_test_queue(4)).await.unwrap();
    start(&store, &acme, &queue_id).await;
    let items = store.list_items(&acme, &queue_id).await.unwrap();
    let now = Utc::now();

    store
        .update_items(
            &acme,
            &queue_id,
            vec![
                ItemUpdate::completed(&items[0], Some("remote-0".into()), now),
                ItemUpdate::completed(&items[1], None, now),
                ItemUpdate::failed(&items[2], "rejected".into(), now),
            ],
        )
        .await
        .unwrap();

    let counts = store.item_counts(&acme, &queue_id).await.unwrap();
    assert_eq!((counts.total, counts.pending, counts.completed, counts.failed), (4, 1, 2, 1));

    let queue = store
        .update_queue_status(&acme, &queue_id, QueuePatch::counts(counts))
        .await
        .unwrap();
    assert_eq!((queue.processed_items, queue.failed_items, queue.progress), (2, 1, 50));

    let stored = store.list_items(&acme, &queue_id).await.unwrap();
    assert_eq!(stored[0].created_external_id.as_deref(), Some("remote-0"));
    assert!(stored[2].processed_at.is_some());
    assert_eq!(store.next_attempt_at(&acme, &queue_id).await.unwrap(), None);
}

/// S5. Queue State Machine Is Enforced
#[tokio::test]
async fn test_queue_state_machine_is_enforced() {
    let store = MemoryQueueStore::new();
    let acme = tenant("acme");
    let queue_id = store.create_queue(&acme, create_test_queue(1)).await.unwrap();

    // pending -> completed skips processing
    assert!(matches!(
        store
            .update_queue_status(&acme, &queue_id, QueuePatch::status(QueueStatus::Completed))
            .await,
        Err(SyncError::InvalidTransition { from: QueueStatus::Pending, to: QueueStatus::Completed })
    ));

    start(&store, &acme, &queue_id).await;
    store
        .update_queue_status(&acme, &queue_id, QueuePatch::status(QueueStatus::Failed).with_error("boom"))
        .await
        .unwrap();

    // Terminal queues accept neither status nor item writes
    assert!(matches!(
        store
            .update_queue_status(&acme, &queue_id, QueuePatch::status(QueueStatus::Processing))
            .await,
        Err(SyncError::QueueTerminal { status: QueueStatus::Failed, .. })
    ));
    let items = store.list_items(&acme, &queue_id).await.unwrap();
    assert!(matches!(
        store
            .update_items(&acme, &queue_id, vec![ItemUpdate::completed(&items[0], None, Utc::now())])
            .await,
        Err(SyncError::QueueTerminal { .. })
    ));

    let queue = store.get_queue(&acme, &queue_id).await.unwrap().unwrap();
    assert_eq!(queue.last_error.as_deref(), Some("boom"));
}

/// S6. Unknown Items Reject The Whole Batch
#[tokio::test]
async fn test_unknown_item_rejects_whole_batch() {
    let store = MemoryQueueStore::new();
    let acme = tenant("acme");
    let queue_id = store.create_queue(&acme, create_test_queue(2)).await.unwrap();
    let items = store.list_items(&acme, &queue_id).await.unwrap();

    let mut ghost = ItemUpdate::completed(&items[1], None, Utc::now());
    ghost.item_id = ItemId(999_999);

    let result = store
        .update_items(
            &acme,
            &queue_id,
            vec![ItemUpdate::completed(&items[0], None, Utc::now()), ghost],
        )
        .await;
    assert!(matches!(result, Err(SyncError::ItemNotFound(_))));
    assert_eq!(store.item_counts(&acme, &queue_id).await.unwrap().completed, 0);
}

/// S7. Foreign Tenants See Nothing
#[tokio::test]
async fn test_foreign_tenant_sees_missing_queue() {
    let store = MemoryQueueStore::new();
    let acme = tenant("acme");
    let globex = tenant("globex");
    let queue_id = store.create_queue(&acme, create_test_queue(1)).await.unwrap();
    let missing = QueueId::new();

    assert!(store.get_queue(&globex, &queue_id).await.unwrap().is_none());

    let foreign = store.item_counts(&globex, &queue_id).await.unwrap_err();
    let absent = store.item_counts(&globex, &missing).await.unwrap_err();
    assert!(matches!(foreign, SyncError::QueueNotFound(_)));
    assert!(matches!(absent, SyncError::QueueNotFound(_)));

    assert!(store
        .update_queue_status(&globex, &queue_id, QueuePatch::status(QueueStatus::Processing))
        .await
        .is_err());
    let queue = store.get_queue(&acme, &queue_id).await.unwrap().unwrap();
    assert_eq!(queue.status, QueueStatus::Pending);
}
