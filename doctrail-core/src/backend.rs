//! Storage backend abstraction for the document store.
//!
//! This module defines the traits that abstract over the concrete database driver, so the
//! generic facade never touches driver types directly.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait is the full verb set the facade needs: inserts, cursor
//! reads, counts, distinct values, updates, deletes, replacements, aggregation, bulk
//! writes and index management. Filters, updates and pipelines are passed through as
//! native BSON documents; the backend never interprets them on the facade's behalf.
//! Implementations are required to be thread-safe (`Send + Sync`) and support concurrent
//! access.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DynStoreBackend`]: A trait for dynamic dispatch over backend implementations
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use doctrail::backend::StoreBackend;
//! use bson::doc;
//!
//! let id = backend.insert_one("users", doc! { "name": "Alice", "age": 30 }).await?;
//! let adults = backend.count_documents("users", doc! { "age": { "$gte": 18 } }).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, RawDocumentBuf};
use futures::stream::BoxStream;
use std::{any::Any, fmt::Debug};

use crate::{error::DocumentStoreResult, index::IndexSpec};

/// An ordered list of aggregation stages.
pub type Pipeline = Vec<BsonDocument>;

/// A uniquely-owned stream of raw result documents.
///
/// The cursor is drained by exactly one caller; dropping it releases the server-side
/// cursor.
pub type DocumentCursor = BoxStream<'static, DocumentStoreResult<RawDocumentBuf>>;

/// Options for multi-document reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Maximum number of documents to return. `None` lets the facade apply its default.
    pub limit: Option<usize>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Sort specification, e.g. `{ "name": 1 }`.
    pub sort: Option<BsonDocument>,
    /// Projection specification.
    pub projection: Option<BsonDocument>,
}

impl FindOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_sort(mut self, sort: BsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_projection(mut self, projection: BsonDocument) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options for single-document reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    pub skip: Option<u64>,
    pub sort: Option<BsonDocument>,
    pub projection: Option<BsonDocument>,
}

impl FindOneOptions {
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_sort(mut self, sort: BsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_projection(mut self, projection: BsonDocument) -> Self {
        self.projection = Some(projection);
        self
    }
}

impl From<FindOptions> for FindOneOptions {
    fn from(options: FindOptions) -> Self {
        Self {
            skip: options.skip,
            sort: options.sort,
            projection: options.projection,
        }
    }
}

/// Options for single-document updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches the filter.
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Options for whole-document replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOptions {
    pub upsert: bool,
}

impl ReplaceOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// The backend's report for an update or replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    /// Identity of the document inserted by an upsert, if one was.
    pub upserted_id: Option<Bson>,
}

/// A single write queued in a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: BsonDocument },
    UpdateOne { filter: BsonDocument, update: BsonDocument },
    DeleteOne { filter: BsonDocument },
}

/// Aggregate counts for a bulk batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
}

impl BulkWriteSummary {
    /// Total number of documents the batch touched.
    pub fn affected(&self) -> u64 {
        self.inserted_count + self.modified_count + self.deleted_count + self.upserted_count
    }
}

/// Abstract interface for document storage backends.
///
/// Implementers of this trait translate the facade's verbs into driver calls. Filters,
/// updates and pipelines arrive as native BSON documents and are passed to the database
/// as-is.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific but should be
/// documented by the implementer.
///
/// # Error Handling
///
/// Backends report driver failures as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend) carrying the
/// native error; the facade classifies them into read or write failures. A backend that
/// knows a read matched nothing may return
/// [`DocumentStoreError::NotFound`](crate::error::DocumentStoreError::NotFound).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Short name of the database system, used as the span's `db.system`.
    fn kind(&self) -> &'static str;

    /// Checks that the database is reachable.
    async fn ping(&self) -> DocumentStoreResult<()>;

    /// Inserts one document and returns its identity.
    ///
    /// A document without an `_id` gets one generated by the backend.
    async fn insert_one(&self, collection: &str, document: BsonDocument)
    -> DocumentStoreResult<Bson>;

    /// Inserts documents in order and returns their identities.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Opens a cursor over the documents matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<Option<RawDocumentBuf>>;

    /// Counts the documents matching `filter`.
    async fn count_documents(&self, collection: &str, filter: BsonDocument)
    -> DocumentStoreResult<u64>;

    /// Returns the distinct values of `field` among documents matching `filter`.
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first document matching `filter` and returns the deleted count.
    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64>;

    /// Deletes every document matching `filter` and returns the deleted count.
    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64>;

    /// Replaces the first document matching `filter` with `replacement`.
    async fn replace_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Runs an aggregation pipeline and returns a cursor over its output.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Pipeline,
    ) -> DocumentStoreResult<DocumentCursor>;

    /// Submits a batch of writes in one round trip.
    ///
    /// Writes are applied in order; the first failure stops the batch and is returned
    /// with whatever partial result the driver reports.
    async fn bulk_write(
        &self,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> DocumentStoreResult<BulkWriteSummary>;

    /// Creates an index. Creating an identical index twice succeeds.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the database.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Object-safe mirror of [`StoreBackend`] for runtime backend selection.
///
/// Every [`StoreBackend`] implements this trait, and `Box<dyn DynStoreBackend>` in turn
/// implements [`StoreBackend`], so a boxed backend plugs into
/// [`DocumentStore`](crate::store::DocumentStore) unchanged.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    fn kind(&self) -> &'static str;

    async fn ping(&self) -> DocumentStoreResult<()>;

    async fn insert_one(&self, collection: &str, document: BsonDocument)
    -> DocumentStoreResult<Bson>;

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor>;

    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<Option<RawDocumentBuf>>;

    async fn count_documents(&self, collection: &str, filter: BsonDocument)
    -> DocumentStoreResult<u64>;

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<Bson>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome>;

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64>;

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64>;

    async fn replace_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Pipeline,
    ) -> DocumentStoreResult<DocumentCursor>;

    async fn bulk_write(
        &self,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> DocumentStoreResult<BulkWriteSummary>;

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()>;

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

#[async_trait]
impl<B: StoreBackend + 'static> DynStoreBackend for B {
    fn kind(&self) -> &'static str {
        StoreBackend::kind(self)
    }

    async fn ping(&self) -> DocumentStoreResult<()> {
        StoreBackend::ping(self).await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: BsonDocument,
    ) -> DocumentStoreResult<Bson> {
        StoreBackend::insert_one(self, collection, document).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        StoreBackend::insert_many(self, collection, documents).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        StoreBackend::find(self, collection, filter, options).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<Option<RawDocumentBuf>> {
        StoreBackend::find_one(self, collection, filter, options).await
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<u64> {
        StoreBackend::count_documents(self, collection, filter).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<Bson>> {
        StoreBackend::distinct(self, collection, field, filter).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        StoreBackend::update_one(self, collection, filter, update, options).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome> {
        StoreBackend::update_many(self, collection, filter, update).await
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        StoreBackend::delete_one(self, collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        StoreBackend::delete_many(self, collection, filter).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        StoreBackend::replace_one(self, collection, filter, replacement, options).await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Pipeline,
    ) -> DocumentStoreResult<DocumentCursor> {
        StoreBackend::aggregate(self, collection, pipeline).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> DocumentStoreResult<BulkWriteSummary> {
        StoreBackend::bulk_write(self, collection, models).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        StoreBackend::create_index(self, collection, index).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        StoreBackend::list_collections(self).await
    }

    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()> {
        StoreBackend::shutdown(*self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[async_trait]
impl StoreBackend for Box<dyn DynStoreBackend> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    async fn ping(&self) -> DocumentStoreResult<()> {
        (**self).ping().await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: BsonDocument,
    ) -> DocumentStoreResult<Bson> {
        (**self).insert_one(collection, document).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        (**self).insert_many(collection, documents).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        (**self).find(collection, filter, options).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<Option<RawDocumentBuf>> {
        (**self).find_one(collection, filter, options).await
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<u64> {
        (**self).count_documents(collection, filter).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<Bson>> {
        (**self).distinct(collection, field, filter).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self)
            .update_one(collection, filter, update, options)
            .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self).update_many(collection, filter, update).await
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        (**self).delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        (**self).delete_many(collection, filter).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self)
            .replace_one(collection, filter, replacement, options)
            .await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Pipeline,
    ) -> DocumentStoreResult<DocumentCursor> {
        (**self).aggregate(collection, pipeline).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> DocumentStoreResult<BulkWriteSummary> {
        (**self).bulk_write(collection, models).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        (**self).create_index(collection, index).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        DynStoreBackend::shutdown_boxed(self).await
    }
}

/// Factory for backend instances.
///
/// [`DocumentStore::connect`](crate::store::DocumentStore::connect) consumes a builder the
/// first time it runs, so a builder only has to describe how to reach the database.
#[async_trait]
pub trait StoreBackendBuilder: Send {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;

    /// Wraps this builder so it produces a `Box<dyn DynStoreBackend>`.
    fn boxed(self) -> BoxedBuilder<Self>
    where
        Self: Sized,
    {
        BoxedBuilder(self)
    }
}

/// Builder adapter returned by [`StoreBackendBuilder::boxed`].
#[derive(Debug)]
pub struct BoxedBuilder<T>(T);

#[async_trait]
impl<T> StoreBackendBuilder for BoxedBuilder<T>
where
    T: StoreBackendBuilder,
    T::Backend: 'static,
{
    type Backend = Box<dyn DynStoreBackend>;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let backend = self.0.build().await?;
        Ok(Box::new(backend))
    }
}
