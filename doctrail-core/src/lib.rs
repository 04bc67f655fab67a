//! A traced, type-safe data-access layer for document databases.
//!
//! This crate is the core of the doctrail project and provides:
//!
//! - **Document contract** ([`document`]) - The traits persisted and aggregate types implement
//! - **Store backend abstraction** ([`backend`]) - The verb set a database driver must provide
//! - **Store handle** ([`store`]) - Connection lifecycle and the typed read, write, aggregate,
//!   import and bulk operations
//! - **Result decoding** ([`decode`]) - Cursor draining with an optional custom decode path
//! - **Tracing** ([`trace`]) - One span per operation, named `<store>.<operation>.<collection>`
//! - **Indexes** ([`index`]) - Index declarations and the process-wide index registry
//! - **Error handling** ([`error`]) - The error taxonomy shared by every operation
//!
//! # Example
//!
//! ```ignore
//! use doctrail::prelude::*;
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
//! let store = DocumentStore::new();
//! store.connect(InMemoryStoreBuilder::new()).await?;
//!
//! let peter = store.save(User { id: None, name: "Peter".into() }).await?;
//! let users: Vec<User> = store.find(doc! { "name": "Peter" }, 0).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as doctrail_core;

pub mod backend;
pub mod bulk;
pub mod decode;
pub mod document;
pub mod error;
pub mod import;
pub mod index;
pub mod pipeline;
pub mod read;
pub mod store;
pub mod trace;
pub mod write;

#[doc(hidden)]
pub mod __private {
    pub use inventory;
}
