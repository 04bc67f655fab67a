//! MongoDB backend implementation for doctrail.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait over the
//! official async driver. Filters, updates and aggregation pipelines are passed to the
//! server as native documents.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! doctrail = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Raw cursors** - Results are streamed as raw BSON and decoded by the facade
//! - **One-round-trip bulk writes** - Batches use the client-level `bulkWrite` command
//!   (MongoDB 8.0+)
//! - **Index management** - Named, unique, sparse and TTL indexes
//! - **Read preference** - Secondary-preferred by default; pings always go to the primary
//! - **Bounded shutdown** - The pool is closed within a configurable grace period
//!
//! # Example
//!
//! ```ignore
//! use doctrail::prelude::*;
//! use doctrail::mongodb::MongoDbStoreBuilder;
//!
//! let store = DocumentStore::new();
//! store
//!     .connect(MongoDbStoreBuilder::new("mongodb://localhost:27017", "my_database"))
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as doctrail_mongodb;

pub mod config;
pub mod store;

pub use config::{MongoDbConfig, ReadPreferenceMode};
pub use store::{MongoDbStore, MongoDbStoreBuilder};
