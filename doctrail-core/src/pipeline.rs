//! Aggregation reads.
//!
//! Pipelines come either straight from the caller or from an
//! [`AggregateDescriptor`], which derives them from a filter. Results are bounded by the
//! same default limit as [`DocumentStore::find`].

use bson::{Document as BsonDocument, doc};

use crate::{
    backend::{Pipeline, StoreBackend},
    decode::{self, DecodeDocument},
    document::AggregateDescriptor,
    error::{DocumentStoreError, DocumentStoreResult},
    store::DocumentStore,
    trace::Statement,
};

impl<B: StoreBackend> DocumentStore<B> {
    /// Runs the pipeline `aggregate` derives from `filter` and decodes up to `limit` results.
    ///
    /// ```ignore
    /// let template = ActiveUser::default();
    /// let users = store.pipe_find(&template, doc! { "team": "core" }, 0).await?;
    /// ```
    pub async fn pipe_find<A: AggregateDescriptor>(
        &self,
        aggregate: &A,
        filter: BsonDocument,
        limit: usize,
    ) -> DocumentStoreResult<Vec<A>> {
        self.connection()?;
        let pipeline = aggregate.build_pipeline(filter);

        self.pipe_find_by_pipeline::<A>(A::collection_name(), pipeline, limit)
            .await
    }

    /// Runs `pipeline` against `collection` and decodes up to `limit` results into `T`.
    ///
    /// A `$limit` stage with the resolved limit is appended to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ReadFailed`] if the aggregation or decoding fails.
    pub async fn pipe_find_by_pipeline<T: DecodeDocument>(
        &self,
        collection: &str,
        mut pipeline: Pipeline,
        limit: usize,
    ) -> DocumentStoreResult<Vec<T>> {
        let conn = self.connection()?;
        let limit = self.config().resolve_limit(Some(limit));
        pipeline.push(doc! { "$limit": i64::try_from(limit).unwrap_or(i64::MAX) });

        let span = conn
            .tracer
            .start("pipe_find", collection, Statement::Pipeline(&pipeline));

        let result = span
            .instrument(async {
                let cursor = conn.backend.aggregate(collection, pipeline).await?;
                decode::collect::<T>(cursor, limit).await
            })
            .await
            .map_err(DocumentStoreError::into_read_failed);

        if let Ok(items) = &result {
            span.record_affected(items.len() as u64);
        }

        span.finish(result)
    }

    /// Runs the pipeline `aggregate` derives from `filter` and decodes its first result.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::NotFound`] when the pipeline yields nothing
    /// - [`DocumentStoreError::ReadFailed`] for any other failure
    pub async fn pipe_find_one<A: AggregateDescriptor>(
        &self,
        aggregate: &A,
        filter: BsonDocument,
    ) -> DocumentStoreResult<A> {
        let conn = self.connection()?;
        let collection = A::collection_name();
        let mut pipeline = aggregate.build_pipeline(filter);
        pipeline.push(doc! { "$limit": 1 });

        let span = conn
            .tracer
            .start("pipe_find_one", collection, Statement::Pipeline(&pipeline));

        let result = span
            .instrument(async {
                let cursor = conn.backend.aggregate(collection, pipeline).await?;
                decode::collect::<A>(cursor, 1)
                    .await?
                    .pop()
                    .ok_or_else(|| DocumentStoreError::NotFound(collection.to_string()))
            })
            .await
            .map_err(DocumentStoreError::into_read_failed);

        span.finish(result)
    }
}
