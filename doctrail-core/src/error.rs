//! Error types and result types for document store operations.
//!
//! This module provides the error taxonomy shared by every facade operation.
//! Use [`DocumentStoreResult<T>`] as the return type for fallible operations.
//!
//! Callers branch on the variant (or the `is_*` predicates) and reach the
//! backend's native error through [`std::error::Error::source`]:
//!
//! ```ignore
//! match store.find_one::<User>(doc! { "name": "Peter" }).await {
//!     Ok(user) => println!("found {user:?}"),
//!     Err(e) if e.is_not_found() => println!("no such user"),
//!     Err(e) => return Err(e),
//! }
//! ```

use std::{error::Error as StdError, fmt};

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Boxed error produced by a storage backend driver.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The store handle has not been connected (or its connection attempt failed).
    #[error("Document store is not connected")]
    NotConnected,
    /// The backend could not be built or reached while connecting.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] BoxError),
    /// The connectivity probe run during connect (or a health check) failed.
    #[error("Ping failed: {0}")]
    PingFailed(#[source] BoxError),
    /// The document is absent or failed its validation rules.
    #[error("Invalid document: {0}")]
    InvalidDocument(#[source] ValidationError),
    /// A backend read failed. The source is the backend's native error.
    #[error("Read failed: {0}")]
    ReadFailed(#[source] BoxError),
    /// A backend write failed. The source is the backend's native error.
    #[error("Write failed: {0}")]
    WriteFailed(#[source] BoxError),
    /// The backend reported zero matching documents for a single-document read.
    #[error("No documents found in collection {0}")]
    NotFound(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend configuration, before any connection is attempted.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// Reading caller-supplied input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An error raised by a storage backend, not yet classified by the facade.
    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Wraps any driver error as an unclassified backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        DocumentStoreError::Backend(err.into())
    }

    /// Builds an [`DocumentStoreError::InvalidDocument`] from a message.
    pub fn invalid(message: impl Into<String>) -> Self {
        DocumentStoreError::InvalidDocument(ValidationError::new(message))
    }

    /// Returns `true` for the not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentStoreError::NotFound(_))
    }

    /// Returns `true` when the store handle was not ready.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, DocumentStoreError::NotConnected)
    }

    /// Returns `true` when the document was absent or failed validation.
    pub fn is_invalid_document(&self) -> bool {
        matches!(self, DocumentStoreError::InvalidDocument(_))
    }

    /// Classifies an error raised while reading.
    ///
    /// Errors that already carry a facade meaning are returned unchanged.
    pub(crate) fn into_read_failed(self) -> Self {
        match self {
            DocumentStoreError::Backend(source) => DocumentStoreError::ReadFailed(source),
            err @ (DocumentStoreError::NotConnected
            | DocumentStoreError::NotFound(_)
            | DocumentStoreError::InvalidDocument(_)
            | DocumentStoreError::ReadFailed(_)) => err,
            other => DocumentStoreError::ReadFailed(Box::new(other)),
        }
    }

    /// Classifies an error raised while writing.
    pub(crate) fn into_write_failed(self) -> Self {
        match self {
            DocumentStoreError::Backend(source) => DocumentStoreError::WriteFailed(source),
            err @ (DocumentStoreError::NotConnected
            | DocumentStoreError::InvalidDocument(_)
            | DocumentStoreError::WriteFailed(_)) => err,
            other => DocumentStoreError::WriteFailed(Box::new(other)),
        }
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// A business-rule violation reported by [`Document::validate`](crate::document::Document::validate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ValidationError {}
