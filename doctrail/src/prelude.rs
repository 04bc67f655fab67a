//! Convenient re-exports of commonly used types from doctrail.
//!
//! ```ignore
//! use doctrail::prelude::*;
//! ```
//!
//! This provides access to:
//! - Document traits and the `Document` derive
//! - The store handle and its configuration
//! - Backend traits, builders and operation options
//! - Error types

pub use doctrail_core::{
    backend::{
        BulkWriteSummary, FindOneOptions, FindOptions, Pipeline, ReplaceOptions, StoreBackend,
        StoreBackendBuilder, UpdateOptions, UpdateOutcome,
    },
    bulk::BulkOperation,
    decode::DecodeDocument,
    document::{AggregateDescriptor, Document, DocumentExt},
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    index::IndexSpec,
    store::{DocumentStore, DynDocumentStore, StoreConfig},
};
pub use doctrail_macros::Document;
