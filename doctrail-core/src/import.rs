//! Bulk loading of externally supplied documents.

use bson::Document as BsonDocument;
use futures::io::{AsyncRead, AsyncReadExt};

use crate::{
    backend::StoreBackend,
    error::{DocumentStoreError, DocumentStoreResult},
    store::DocumentStore,
    trace::Statement,
};

impl<B: StoreBackend> DocumentStore<B> {
    /// Loads a JSON array of documents from `reader` into `collection` with one batched insert.
    ///
    /// Elements may use MongoDB extended JSON literals such as `{"$oid": "..."}` or
    /// `{"$date": {"$numberLong": "..."}}`; they are inserted as native BSON values. An
    /// empty array is a successful no-op that never reaches the backend.
    ///
    /// Returns the number of inserted documents.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::Io`] if reading fails
    /// - [`DocumentStoreError::InvalidDocument`] if the input is not an array of objects
    /// - [`DocumentStoreError::WriteFailed`] if the insert fails
    pub async fn import<R>(&self, collection: &str, mut reader: R) -> DocumentStoreResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let conn = self.connection()?;

        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;

        let documents: Vec<BsonDocument> = serde_json::from_slice(&data)
            .map_err(|e| DocumentStoreError::invalid(format!("malformed import data: {e}")))?;
        if documents.is_empty() {
            return Ok(0);
        }

        let span = conn.tracer.start("import", collection, Statement::None);
        let result = span
            .instrument(conn.backend.insert_many(collection, documents))
            .await
            .map(|ids| ids.len() as u64)
            .map_err(DocumentStoreError::into_write_failed);

        if let Ok(inserted) = &result {
            span.record_affected(*inserted);
        }

        span.finish(result)
    }
}
