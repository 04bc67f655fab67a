//! Typed write operations.

use bson::Document as BsonDocument;

use crate::{
    backend::{ReplaceOptions, StoreBackend, UpdateOptions, UpdateOutcome},
    document::{Document, DocumentExt, identity_filter},
    error::{DocumentStoreError, DocumentStoreResult},
    store::DocumentStore,
    trace::Statement,
};

impl<B: StoreBackend> DocumentStore<B> {
    /// Validates and inserts `document`, returning it with its new identity assigned.
    ///
    /// Passing `None` models an absent document and is rejected like a failed validation.
    ///
    /// ```ignore
    /// let user = store.save(User::new("Peter")).await?;
    /// assert!(user.id.is_some());
    /// ```
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidDocument`] if the document is absent or
    ///   [`Document::validate`] rejects it. Nothing is written.
    /// - [`DocumentStoreError::WriteFailed`] if the insert fails
    /// - [`DocumentStoreError::Serialization`] if the document was written but the
    ///   generated identity does not fit its identity field
    pub async fn save<D: Document>(&self, document: impl Into<Option<D>>) -> DocumentStoreResult<D> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let span = conn.tracer.start("save", collection, Statement::None);

        let result = span
            .instrument(async {
                let document = document
                    .into()
                    .ok_or_else(|| DocumentStoreError::invalid("document cannot be nil"))?;
                document
                    .validate()
                    .map_err(DocumentStoreError::InvalidDocument)?;

                let id = conn
                    .backend
                    .insert_one(collection, document.to_bson_document()?)
                    .await?;
                Ok::<_, DocumentStoreError>((document, id))
            })
            .await
            .map_err(DocumentStoreError::into_write_failed)
            .and_then(|(mut document, id)| {
                document.set_id(id)?;
                Ok(document)
            });

        if let Ok(saved) = &result {
            span.record_affected(1);
            if let Some(id) = saved.id() {
                span.record_inserted_id(&id);
            }
        }

        span.finish(result)
    }

    /// Applies `update` to the first `D` matching `filter` and returns the modified count.
    pub async fn update_one<D: Document>(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<u64> {
        self.update_one_with_options::<D>(filter, update, UpdateOptions::default())
            .await
            .map(|outcome| outcome.modified_count)
    }

    /// Like [`update_one`](Self::update_one), returning the full outcome. With
    /// [`UpdateOptions::upsert`] a missing document is inserted.
    pub async fn update_one_with_options<D: Document>(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let span = conn
            .tracer
            .start("update_one", collection, Statement::Filter(&filter));

        let result = span
            .instrument(
                conn.backend
                    .update_one(collection, filter, update, options),
            )
            .await
            .map_err(DocumentStoreError::into_write_failed);

        if let Ok(outcome) = &result {
            span.record_affected(outcome.modified_count);
            if let Some(id) = &outcome.upserted_id {
                span.record_inserted_id(id);
            }
        }

        span.finish(result)
    }

    /// Applies `update` to every `D` matching `filter` and returns the modified count.
    pub async fn update_many<D: Document>(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<u64> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let span = conn
            .tracer
            .start("update_many", collection, Statement::Filter(&filter));

        let result = span
            .instrument(conn.backend.update_many(collection, filter, update))
            .await
            .map(|outcome| outcome.modified_count)
            .map_err(DocumentStoreError::into_write_failed);

        if let Ok(modified) = &result {
            span.record_affected(*modified);
        }

        span.finish(result)
    }

    /// Applies `update` to the stored copy of `document`.
    ///
    /// Returns `0` when the document no longer exists.
    pub async fn update_by_id<D: Document>(
        &self,
        document: &D,
        update: BsonDocument,
    ) -> DocumentStoreResult<u64> {
        self.connection()?;
        let filter = identity_filter(document)
            .ok_or_else(|| DocumentStoreError::invalid("document has no identity"))?;

        self.update_one::<D>(filter, update).await
    }

    /// Deletes the first `D` matching `filter` and returns the deleted count.
    pub async fn delete_one<D: Document>(&self, filter: BsonDocument) -> DocumentStoreResult<u64> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let span = conn
            .tracer
            .start("delete_one", collection, Statement::Filter(&filter));

        let result = span
            .instrument(conn.backend.delete_one(collection, filter))
            .await
            .map_err(DocumentStoreError::into_write_failed);

        if let Ok(deleted) = &result {
            span.record_affected(*deleted);
        }

        span.finish(result)
    }

    /// Deletes every `D` matching `filter` and returns the deleted count.
    pub async fn delete_many<D: Document>(&self, filter: BsonDocument) -> DocumentStoreResult<u64> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let span = conn
            .tracer
            .start("delete_many", collection, Statement::Filter(&filter));

        let result = span
            .instrument(conn.backend.delete_many(collection, filter))
            .await
            .map_err(DocumentStoreError::into_write_failed);

        if let Ok(deleted) = &result {
            span.record_affected(*deleted);
        }

        span.finish(result)
    }

    /// Deletes the stored copy of `document`.
    pub async fn delete_by_id<D: Document>(&self, document: &D) -> DocumentStoreResult<u64> {
        self.connection()?;
        let filter = identity_filter(document)
            .ok_or_else(|| DocumentStoreError::invalid("document has no identity"))?;

        self.delete_one::<D>(filter).await
    }

    /// Replaces the first document matching `filter` with the current state of `document`.
    ///
    /// The document is validated first. When the replacement is upserted, the new identity
    /// is written back onto `document`.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidDocument`] if validation fails. Nothing is written.
    /// - [`DocumentStoreError::WriteFailed`] if the replacement fails
    /// - [`DocumentStoreError::Serialization`] if the upserted identity does not fit the
    ///   document's identity field. The replacement itself was written.
    pub async fn replace_one<D: Document>(
        &self,
        document: &mut D,
        filter: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let conn = self.connection()?;
        let collection = D::collection_name();
        let span = conn
            .tracer
            .start("replace_one", collection, Statement::Filter(&filter));

        let result = span
            .instrument(async {
                document
                    .validate()
                    .map_err(DocumentStoreError::InvalidDocument)?;

                let replacement = document.to_bson_document()?;
                conn.backend
                    .replace_one(collection, filter, replacement, options)
                    .await
            })
            .await
            .map_err(DocumentStoreError::into_write_failed)
            .and_then(|outcome| {
                if let Some(id) = &outcome.upserted_id {
                    document.set_id(id.clone())?;
                }
                Ok(outcome)
            });

        if let Ok(outcome) = &result {
            span.record_affected(outcome.matched_count);
            if let Some(id) = &outcome.upserted_id {
                span.record_inserted_id(id);
            }
        }

        span.finish(result)
    }
}
