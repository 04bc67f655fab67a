mod support;

use std::{error::Error, sync::atomic::Ordering};

use doctrail::{
    bson::doc,
    error::DocumentStoreError,
    memory::BulkWriteFailure,
    prelude::*,
};

use support::{CaptureLayer, Harness, User};

#[tokio::test]
async fn test_mixed_batch_runs_in_one_round_trip() {
    let harness = Harness::connected().await;
    let existing = harness.store.save(User::new("Old", 70)).await.unwrap();

    let summary = harness
        .store
        .bulk_for::<User>()
        .insert_one(User::new("Ann", 30))
        .insert_one(User::new("Bob", 41))
        .delete_by_id(existing.id.unwrap())
        .execute()
        .await
        .unwrap();

    assert_eq!(summary.inserted_count, 2);
    assert_eq!(summary.deleted_count, 1);
    assert_eq!(summary.affected(), 3);
    assert_eq!(harness.controls.bulk_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.store.count::<User>(doc! {}).await.unwrap(), 2);
}

#[tokio::test]
async fn test_updates_in_a_batch() {
    let harness = Harness::connected().await;
    let ann = harness.store.save(User::new("Ann", 30)).await.unwrap();
    harness.store.save(User::new("Bob", 41)).await.unwrap();

    let summary = harness
        .store
        .bulk("users")
        .update_by_id(ann.id.unwrap(), doc! { "$set": { "age": 31 } })
        .update_one(doc! { "name": "Bob" }, doc! { "$set": { "active": false } })
        .delete_one(doc! { "name": "nobody" })
        .execute()
        .await
        .unwrap();

    assert_eq!(summary.matched_count, 2);
    assert_eq!(summary.modified_count, 2);
    assert_eq!(summary.deleted_count, 0);

    let ann: User = harness.store.find_by_id(&ann).await.unwrap();
    assert_eq!(ann.age, 31);
}

#[tokio::test]
async fn test_empty_batch_never_reaches_the_backend() {
    let capture = CaptureLayer::default();
    let harness =
        Harness::connected_with(StoreConfig::default().with_dispatch(capture.dispatch())).await;

    let batch = harness.store.bulk_for::<User>();
    assert!(batch.is_empty());
    let summary = batch.execute().await.unwrap();

    assert_eq!(summary, BulkWriteSummary::default());
    assert_eq!(harness.controls.bulk_calls.load(Ordering::SeqCst), 0);
    assert!(capture.operations().is_empty());
}

#[tokio::test]
async fn test_invalid_document_fails_the_whole_batch() {
    let harness = Harness::connected().await;

    let batch = harness
        .store
        .bulk_for::<User>()
        .insert_one(User::new("Ann", 30))
        .insert_one(User::new("", 1))
        .insert_one(User::new("Bob", 41));
    assert_eq!(batch.len(), 2);

    let err = batch.execute().await.unwrap_err();

    assert!(err.is_invalid_document());
    assert_eq!(harness.controls.bulk_calls.load(Ordering::SeqCst), 0);
    assert!(harness.memory.snapshot("users").await.is_empty());
}

#[tokio::test]
async fn test_backend_failure_keeps_partial_result() {
    let harness = Harness::connected().await;
    let existing = harness.store.save(User::new("Old", 70)).await.unwrap();

    let err = harness
        .store
        .bulk_for::<User>()
        .insert_one(User::new("Ann", 30))
        .insert_one(existing)
        .insert_one(User::new("Bob", 41))
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::WriteFailed(_)));
    let failure = err
        .source()
        .and_then(|source| source.downcast_ref::<BulkWriteFailure>())
        .expect("bulk failure detail");
    assert_eq!(failure.index, 1);
    assert_eq!(failure.summary.inserted_count, 1);
    assert!(matches!(
        failure.source,
        DocumentStoreError::DocumentAlreadyExists(_, _)
    ));
    assert_eq!(harness.store.count::<User>(doc! {}).await.unwrap(), 2);
}

#[tokio::test]
async fn test_write_refusal_is_a_write_failure() {
    let harness = Harness::connected().await;
    harness.controls.fail_writes.store(true, Ordering::SeqCst);

    let err = harness
        .store
        .bulk_for::<User>()
        .insert_one(User::new("Ann", 30))
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::WriteFailed(_)));
    assert_eq!(harness.controls.bulk_calls.load(Ordering::SeqCst), 1);
}
