//! Main doctrail crate providing a traced, type-safe interface to document databases.
//!
//! This crate is the primary entry point for users of the doctrail framework. It
//! re-exports the core types from the sub-crates, the `Document` derive, and the storage
//! backends.
//!
//! # Features
//!
//! - **Typed operations** - Save, find, update, delete, replace, distinct and count any
//!   type implementing [`Document`](document::Document)
//! - **Native queries** - Filters, updates and aggregation pipelines are plain BSON
//!   documents passed to the database as-is
//! - **One span per operation** - Every call is traced as `<store>.<operation>.<collection>`
//!   with the query text, affected counts and an OK/ERROR status
//! - **Bulk writes and import** - Batched writes in one round trip, and loading of
//!   extended-JSON arrays
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use doctrail::{prelude::*, memory::InMemoryStoreBuilder};
//! use doctrail::bson::{doc, oid::ObjectId};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Document)]
//! #[document(collection = "users")]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new();
//!     store.connect(InMemoryStoreBuilder::new()).await?;
//!
//!     let alice = store.save(User { id: None, name: "Alice".into() }).await?;
//!     assert!(alice.id.is_some());
//!
//!     let found: User = store.find_one(doc! { "name": "Alice" }).await?;
//!     store
//!         .update_by_id(&found, doc! { "$set": { "name": "Alicia" } })
//!         .await?;
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! A [`DynDocumentStore`](store::DynDocumentStore) picks its backend at runtime. Any
//! builder becomes a builder of boxed backends with
//! [`boxed`](backend::StoreBackendBuilder::boxed):
//!
//! ```ignore
//! use doctrail::{prelude::*, memory::InMemoryStoreBuilder};
//!
//! let store = DynDocumentStore::new();
//! store.connect(InMemoryStoreBuilder::new().boxed()).await?;
//!
//! let memory = store.backend_as::<doctrail::memory::InMemoryStore>();
//! ```
//!
//! # Tracing
//!
//! Spans go to the ambient `tracing` dispatcher unless one is injected:
//!
//! ```ignore
//! let store = DocumentStore::with_config(StoreConfig::default().with_dispatch(dispatch));
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as doctrail;

pub mod prelude;

pub use doctrail_core::{backend, bulk, decode, document, error, index, register_indexes, store, trace};
pub use doctrail_macros::Document;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use doctrail_memory::{BulkWriteFailure, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use doctrail_mongodb::{MongoDbConfig, MongoDbStore, MongoDbStoreBuilder, ReadPreferenceMode};
}
