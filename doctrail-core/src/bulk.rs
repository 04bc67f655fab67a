//! Fluent builder for batched writes.
//!
//! A [`BulkOperation`] accumulates inserts, updates and deletes against one collection
//! without any I/O and submits them in a single round trip on
//! [`execute`](BulkOperation::execute).
//!
//! ```ignore
//! let summary = store
//!     .bulk_for::<User>()
//!     .insert_one(User::new("Ann"))
//!     .insert_one(User::new("Bob"))
//!     .delete_by_id(stale_id)
//!     .execute()
//!     .await?;
//! assert_eq!(summary.inserted_count, 2);
//! ```
//!
//! `execute` consumes the builder, so a batch cannot be submitted twice:
//!
//! ```compile_fail
//! use doctrail_core::{backend::StoreBackend, store::DocumentStore};
//!
//! async fn submit_twice<B: StoreBackend>(store: &DocumentStore<B>) {
//!     let batch = store.bulk("users");
//!     let _ = batch.execute().await;
//!     let _ = batch.execute().await;
//! }
//! ```

use bson::{Bson, Document as BsonDocument, doc};

use crate::{
    backend::{BulkWriteSummary, StoreBackend, WriteModel},
    document::{Document, DocumentExt},
    error::{DocumentStoreError, DocumentStoreResult},
    store::DocumentStore,
    trace::Statement,
};

/// A batch of writes bound to one collection of one store.
///
/// Owned by a single caller; every method takes the builder by value and hands it back.
#[must_use = "a bulk operation does nothing until `execute` is awaited"]
#[derive(Debug)]
pub struct BulkOperation<'a, B: StoreBackend> {
    store: &'a DocumentStore<B>,
    collection: String,
    models: Vec<WriteModel>,
    rejected: Option<DocumentStoreError>,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Starts a batch against `collection`.
    pub fn bulk(&self, collection: impl Into<String>) -> BulkOperation<'_, B> {
        BulkOperation {
            store: self,
            collection: collection.into(),
            models: Vec::new(),
            rejected: None,
        }
    }

    /// Starts a batch against the collection of `D`.
    pub fn bulk_for<D: Document>(&self) -> BulkOperation<'_, B> {
        self.bulk(D::collection_name())
    }
}

impl<'a, B: StoreBackend> BulkOperation<'a, B> {
    /// Queues an insert of `document`.
    ///
    /// A document that fails validation or serialization is not queued; the failure is
    /// reported by [`execute`](Self::execute).
    pub fn insert_one<D: Document>(mut self, document: D) -> Self {
        let encoded = document
            .validate()
            .map_err(DocumentStoreError::InvalidDocument)
            .and_then(|()| document.to_bson_document());

        match encoded {
            Ok(document) => self.models.push(WriteModel::InsertOne { document }),
            Err(err) => self.reject(err),
        }
        self
    }

    pub fn update_one(mut self, filter: BsonDocument, update: BsonDocument) -> Self {
        self.models.push(WriteModel::UpdateOne { filter, update });
        self
    }

    pub fn update_by_id(self, id: impl Into<Bson>, update: BsonDocument) -> Self {
        self.update_one(doc! { "_id": id.into() }, update)
    }

    pub fn delete_one(mut self, filter: BsonDocument) -> Self {
        self.models.push(WriteModel::DeleteOne { filter });
        self
    }

    pub fn delete_by_id(self, id: impl Into<Bson>) -> Self {
        self.delete_one(doc! { "_id": id.into() })
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    fn reject(&mut self, err: DocumentStoreError) {
        if self.rejected.is_none() {
            self.rejected = Some(err);
        }
    }

    /// Submits every queued write in one round trip.
    ///
    /// An empty batch succeeds with an all-zero summary without contacting the backend.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::NotConnected`] if the store is not connected
    /// - [`DocumentStoreError::InvalidDocument`] if a queued document was rejected
    /// - [`DocumentStoreError::WriteFailed`] wrapping the backend's error, which may carry
    ///   the partial result. The batch is neither retried nor split.
    pub async fn execute(self) -> DocumentStoreResult<BulkWriteSummary> {
        let conn = self.store.connection()?;
        if let Some(err) = self.rejected {
            return Err(err);
        }
        if self.models.is_empty() {
            return Ok(BulkWriteSummary::default());
        }

        let collection = self.collection.as_str();
        let span = conn
            .tracer
            .start("bulk_write", collection, Statement::None);

        let result = span
            .instrument(conn.backend.bulk_write(collection, self.models))
            .await
            .map_err(DocumentStoreError::into_write_failed);

        if let Ok(summary) = &result {
            span.record_affected(summary.affected());
        }

        span.finish(result)
    }
}
