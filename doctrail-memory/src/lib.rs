//! In-memory document storage backend for doctrail.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development
//! and testing.
//!
//! # Features
//!
//! - **Query filters** - Implicit equality, comparison, membership, `$exists`, `$not` and
//!   the `$and` / `$or` / `$nor` combinators, over dotted paths
//! - **Update operators** - `$set`, `$unset`, `$inc` and `$push`, with upserts
//! - **Aggregation** - `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count`
//! - **Unique indexes** - Enforced on every write; other index options are recorded
//!
//! Unsupported operators and stages are reported as backend errors instead of being
//! ignored.
//!
//! # Quick Start
//!
//! ```ignore
//! use doctrail::prelude::*;
//! use doctrail::memory::InMemoryStoreBuilder;
//!
//! let store = DocumentStore::new();
//! store.connect(InMemoryStoreBuilder::new()).await?;
//!
//! let user = store.save(User { id: None, name: "Alice".into() }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as doctrail_memory;

mod evaluator;
mod pipeline;
mod update;

pub mod store;

pub use store::{BulkWriteFailure, InMemoryStore, InMemoryStoreBuilder};
