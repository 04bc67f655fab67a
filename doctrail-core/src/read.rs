//! Typed read operations.
//!
//! Each call checks the handle, opens the operation span, delegates to the backend, decodes
//! the raw results into the caller's type and closes the span with the outcome.

use bson::{Document as BsonDocument, deserialize_from_bson};
use serde::de::DeserializeOwned;

use crate::{
    backend::{FindOneOptions, FindOptions, StoreBackend},
    decode,
    document::{Document, identity_filter},
    error::{DocumentStoreError, DocumentStoreResult},
    store::DocumentStore,
    trace::Statement,
};

impl<B: StoreBackend> DocumentStore<B> {
    /// Returns up to `limit` documents of type `D` matching `filter`, in backend order.
    ///
    /// A `limit` of `0` means the configured default (100).
    ///
    /// ```ignore
    /// let active: Vec<User> = store.find(doc! { "active": true }, 0).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ReadFailed`] if the backend read or decoding fails. A
    /// backend "no documents" report yields an empty vector instead.
    pub async fn find<D: Document>(
        &self,
        filter: BsonDocument,
        limit: usize,
    ) -> DocumentStoreResult<Vec<D>> {
        self.find_with_options(filter, FindOptions::default().with_limit(limit))
            .await
    }

    /// Like [`find`](Self::find), with sort, skip and projection.
    pub async fn find_with_options<D: Document>(
        &self,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<D>> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let limit = self.config().resolve_limit(options.limit);
        let span = conn
            .tracer
            .start("find", collection, Statement::Filter(&filter));

        let options = FindOptions {
            limit: Some(limit),
            ..options
        };
        let result = span
            .instrument(async {
                let cursor = conn.backend.find(collection, filter, options).await?;
                decode::collect::<D>(cursor, limit).await
            })
            .await;

        let result = match result {
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            other => other.map_err(DocumentStoreError::into_read_failed),
        };
        if let Ok(items) = &result {
            span.record_affected(items.len() as u64);
        }

        span.finish(result)
    }

    /// Returns the first document of type `D` matching `filter`.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::NotFound`] when nothing matches (the span still reports OK)
    /// - [`DocumentStoreError::ReadFailed`] for any other failure
    pub async fn find_one<D: Document>(&self, filter: BsonDocument) -> DocumentStoreResult<D> {
        self.find_one_with_options(filter, FindOneOptions::default())
            .await
    }

    pub async fn find_one_with_options<D: Document>(
        &self,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<D> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let span = conn
            .tracer
            .start("find_one", collection, Statement::Filter(&filter));

        let result = span
            .instrument(async {
                match conn.backend.find_one(collection, filter, options).await? {
                    Some(raw) => decode::decode_one::<D>(&raw),
                    None => Err(DocumentStoreError::NotFound(collection.to_string())),
                }
            })
            .await
            .map_err(DocumentStoreError::into_read_failed);

        span.finish(result)
    }

    /// Re-reads `document` from the store by its identity.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if `document` was never saved, plus
    /// everything [`find_one`](Self::find_one) returns.
    pub async fn find_by_id<D: Document>(&self, document: &D) -> DocumentStoreResult<D> {
        self.connection()?;
        let filter = identity_filter(document)
            .ok_or_else(|| DocumentStoreError::invalid("document has no identity"))?;

        self.find_one(filter).await
    }

    /// Returns the distinct values of `field` across documents matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ReadFailed`] if the read fails or any single value does
    /// not decode into `T`; no partial result is returned.
    pub async fn distinct<T>(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let conn = self.connection()?;
        let span = conn
            .tracer
            .start("distinct", collection, Statement::Filter(&filter));

        let result = span
            .instrument(conn.backend.distinct(collection, field, filter))
            .await
            .and_then(|values| {
                values
                    .into_iter()
                    .map(|value| Ok(deserialize_from_bson::<T>(value)?))
                    .collect::<DocumentStoreResult<Vec<T>>>()
            })
            .map_err(DocumentStoreError::into_read_failed);

        if let Ok(values) = &result {
            span.record_affected(values.len() as u64);
        }

        span.finish(result)
    }

    /// Counts the documents in `collection` matching `filter`. No limit applies.
    pub async fn count_documents(
        &self,
        collection: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<u64> {
        let conn = self.connection()?;
        let span = conn
            .tracer
            .start("count_documents", collection, Statement::Filter(&filter));

        let result = span
            .instrument(conn.backend.count_documents(collection, filter))
            .await
            .map_err(DocumentStoreError::into_read_failed);

        span.finish(result)
    }

    /// Counts the documents of type `D` matching `filter`.
    pub async fn count<D: Document>(&self, filter: BsonDocument) -> DocumentStoreResult<u64> {
        self.count_documents(D::collection_name(), filter).await
    }
}

