//! Core traits for document representation and serialization.
//!
//! This module provides the contract every persisted type must satisfy, the read-only
//! aggregate specialization, and utilities for converting documents between BSON and JSON.

use bson::{Bson, Document as BsonDocument, deserialize_from_document, serialize_to_document};
use serde::Serialize;
use serde_json::{Value, from_value, to_value};

use crate::{
    backend::Pipeline,
    decode::DecodeDocument,
    error::{DocumentStoreResult, ValidationError},
    index::IndexSpec,
};

/// Core trait that all documents stored in a document store must implement.
///
/// A document names the collection it lives in, exposes the identity the store assigned
/// to it, and checks its own business rules before every write. The identity is opaque
/// to the layer: it is whatever [`Bson`] value the backend generated, and it must
/// round-trip through the field type the document keeps it in.
///
/// # Invariants
///
/// - [`collection_name`](Document::collection_name) is non-empty and fixed per type.
/// - [`id`](Document::id) returns `None` until the first successful write, after which
///   the layer assigns it exactly once through [`set_id`](Document::set_id).
///
/// # Deriving
///
/// Most types use `#[derive(Document)]` from the `doctrail` crate:
///
/// ```ignore
/// use doctrail::prelude::*;
/// use doctrail::bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Document)]
/// #[document(collection = "users", validate = "User::check")]
/// pub struct User {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     #[document(id)]
///     pub id: Option<ObjectId>,
///     pub name: String,
/// }
///
/// impl User {
///     fn check(&self) -> Result<(), ValidationError> {
///         if self.name.is_empty() {
///             return Err(ValidationError::new("name is required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Document: Serialize + DecodeDocument + Send + Sync + 'static {
    /// Returns the name of the collection this document belongs to.
    fn collection_name() -> &'static str;

    /// Returns the store identity, or `None` if the document was never written.
    fn id(&self) -> Option<Bson>;

    /// Assigns the identity generated by the backend.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `id` cannot be represented by the document's
    /// identity field.
    fn set_id(&mut self, id: Bson) -> DocumentStoreResult<()>;

    /// Checks the document's business rules. Called before every write.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Declares the indexes the owning collection needs.
    fn indexes() -> Vec<IndexSpec> {
        Vec::new()
    }
}

/// A read-only document type produced by an aggregation pipeline.
///
/// The descriptor builds its pipeline from a caller-supplied filter; the pipeline runs
/// against [`Document::collection_name`] and every result is decoded into `Self`.
///
/// ```ignore
/// impl AggregateDescriptor for ActiveUser {
///     fn build_pipeline(&self, filter: bson::Document) -> Pipeline {
///         vec![
///             doc! { "$match": filter },
///             doc! { "$match": { "active": true } },
///             doc! { "$sort": { "name": 1 } },
///         ]
///     }
/// }
/// ```
pub trait AggregateDescriptor: Document {
    /// Derives the aggregation stages for `filter`.
    fn build_pipeline(&self, filter: BsonDocument) -> Pipeline;
}

/// Extension trait providing serialization/deserialization utilities for documents.
///
/// This trait is automatically implemented for all types that implement [`Document`].
pub trait DocumentExt: Document {
    /// Converts this document to a BSON document for storage.
    ///
    /// A null `_id` is dropped, so an unsaved identity serialized without
    /// `skip_serializing_if` still lets the backend generate one.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the type does not serialize to a map.
    fn to_bson_document(&self) -> DocumentStoreResult<BsonDocument>;

    /// Creates a document from a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_bson_document(document: BsonDocument) -> DocumentStoreResult<Self>;

    /// Converts this document to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates a document from a JSON value.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_bson_document(&self) -> DocumentStoreResult<BsonDocument> {
        let mut document = serialize_to_document(self)?;
        if matches!(document.get("_id"), Some(Bson::Null)) {
            document.remove("_id");
        }
        Ok(document)
    }

    fn from_bson_document(document: BsonDocument) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_document(document)?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Builds the `{ _id: <identity> }` filter for a document.
///
/// Returns `None` when the document has no identity yet.
pub fn identity_filter<D: Document>(document: &D) -> Option<BsonDocument> {
    document.id().map(|id| bson::doc! { "_id": id })
}
