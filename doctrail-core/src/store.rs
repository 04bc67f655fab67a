//! The store handle.
//!
//! [`DocumentStore`] owns the connection to one backend. It is created unconnected, becomes
//! ready through a guarded one-time [`connect`](DocumentStore::connect), and is consumed by
//! [`shutdown`](DocumentStore::shutdown). Every facade operation (see the `read`, `write`,
//! `pipeline`, `import` and `bulk` modules) hangs off this handle.
//!
//! # Example
//!
//! ```ignore
//! use doctrail::prelude::*;
//! use doctrail::memory::InMemoryStoreBuilder;
//!
//! let store = DocumentStore::new();
//! store.connect(InMemoryStoreBuilder::new()).await?;
//!
//! let saved = store.save(User::new("Peter")).await?;
//! let found: User = store.find_by_id(&saved).await?;
//! ```

use std::fmt;

use mea::mutex::Mutex;
use once_cell::sync::OnceCell;
use tracing::{Dispatch, debug, info, warn};

use crate::{
    backend::{DynStoreBackend, StoreBackend, StoreBackendBuilder},
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    index::{IndexSpec, registered_indexes},
    trace::{OpTracer, Statement, TRACE_TARGET},
};

/// Default number of documents returned by multi-document reads when no limit is given.
pub const DEFAULT_LIMIT: usize = 100;

/// Behaviour shared by every operation on a store handle.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Limit applied when a read passes `0` or no limit.
    pub default_limit: usize,
    /// Dispatcher spans are created under. `None` uses the ambient default dispatcher.
    pub dispatch: Option<Dispatch>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            dispatch: None,
        }
    }
}

impl StoreConfig {
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn with_dispatch(mut self, dispatch: impl Into<Dispatch>) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }

    /// A configuration whose spans are never recorded.
    pub fn without_tracing() -> Self {
        Self {
            dispatch: Some(Dispatch::none()),
            ..Self::default()
        }
    }

    /// Resolves a caller limit, treating `0` and `None` as "use the default".
    pub fn resolve_limit(&self, limit: Option<usize>) -> usize {
        match limit {
            Some(limit) if limit > 0 => limit,
            _ => self.default_limit,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection<B> {
    pub(crate) backend: B,
    pub(crate) tracer: OpTracer,
}

/// A handle to one document database.
///
/// The handle is explicit: construct it, connect it once, pass it (or `&` it) to the code
/// that needs it. Connecting is guarded so concurrent callers build exactly one backend,
/// and after it succeeds every read of the handle's state is lock-free.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type. Use `Box<dyn DynStoreBackend>` (see
///   [`DynDocumentStore`]) to pick the backend at runtime.
pub struct DocumentStore<B: StoreBackend> {
    config: StoreConfig,
    init: Mutex<()>,
    connection: OnceCell<Connection<B>>,
}

/// A store whose backend is chosen at runtime.
pub type DynDocumentStore = DocumentStore<Box<dyn DynStoreBackend>>;

impl<B: StoreBackend> fmt::Debug for DocumentStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("config", &self.config)
            .field("connection", &self.connection.get())
            .finish()
    }
}

impl<B: StoreBackend> Default for DocumentStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates an unconnected store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an unconnected store.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            init: Mutex::new(()),
            connection: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Connects the store by building its backend and pinging it.
    ///
    /// Concurrent callers are serialized; only the first builds a backend. Once connected,
    /// further calls return `Ok(())` without touching `builder`.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::ConnectionFailed`] if the backend cannot be built
    /// - [`DocumentStoreError::PingFailed`] if the backend does not answer the ping. The
    ///   backend is shut down and the store stays unconnected, so the call can be retried.
    pub async fn connect<T>(&self, builder: T) -> DocumentStoreResult<()>
    where
        T: StoreBackendBuilder<Backend = B>,
    {
        if self.connection.get().is_some() {
            return Ok(());
        }

        let _guard = self.init.lock().await;
        if self.connection.get().is_some() {
            return Ok(());
        }

        let backend = builder
            .build()
            .await
            .map_err(|e| DocumentStoreError::ConnectionFailed(Box::new(e)))?;

        if let Err(err) = backend.ping().await {
            let kind = backend.kind();
            if let Err(shutdown_err) = backend.shutdown().await {
                warn!(
                    target: TRACE_TARGET,
                    store = kind,
                    error = %shutdown_err,
                    "backend shutdown after failed ping also failed"
                );
            }
            return Err(DocumentStoreError::PingFailed(Box::new(err)));
        }

        let tracer = OpTracer::new(self.config.dispatch.clone(), backend.kind());
        info!(
            target: TRACE_TARGET,
            store = backend.kind(),
            recording = tracer.is_recording(),
            "document store connected"
        );

        let _ = self.connection.set(Connection { backend, tracer });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some()
    }

    /// The connected backend, if any.
    pub fn backend(&self) -> Option<&B> {
        self.connection.get().map(|conn| &conn.backend)
    }

    /// Readiness check performed before any span is opened.
    pub(crate) fn connection(&self) -> DocumentStoreResult<&Connection<B>> {
        self.connection
            .get()
            .ok_or(DocumentStoreError::NotConnected)
    }

    /// Pings the backend.
    pub async fn health(&self) -> DocumentStoreResult<()> {
        let conn = self.connection()?;
        let span = conn.tracer.start("ping", "admin", Statement::None);

        let result = span
            .instrument(conn.backend.ping())
            .await
            .map_err(|e| DocumentStoreError::PingFailed(Box::new(e)));

        span.finish(result)
    }

    /// Reports whether a collection with this name exists.
    pub async fn collection_exists(&self, name: &str) -> DocumentStoreResult<bool> {
        let conn = self.connection()?;
        let span = conn
            .tracer
            .start("list_collections", name, Statement::None);

        let result = span
            .instrument(conn.backend.list_collections())
            .await
            .map(|names| names.iter().any(|existing| existing == name))
            .map_err(DocumentStoreError::into_read_failed);

        span.finish(result)
    }

    /// Applies the indexes of every type registered with `register_indexes!`.
    ///
    /// Applying the same indexes again is a no-op on the server.
    pub async fn ensure_indexes(&self) -> DocumentStoreResult<()> {
        self.connection()?;

        for registration in registered_indexes() {
            self.apply_indexes(registration.collection_name(), registration.indexes())
                .await?;
        }

        Ok(())
    }

    /// Applies the indexes declared by `D`.
    pub async fn ensure_indexes_for<D: Document>(&self) -> DocumentStoreResult<()> {
        self.connection()?;
        self.apply_indexes(D::collection_name(), D::indexes()).await
    }

    async fn apply_indexes(
        &self,
        collection: &str,
        indexes: Vec<IndexSpec>,
    ) -> DocumentStoreResult<()> {
        let conn = self.connection()?;

        for index in indexes {
            let span = conn
                .tracer
                .start("create_index", collection, Statement::Filter(&index.keys));

            let result = span
                .instrument(conn.backend.create_index(collection, &index))
                .await
                .map_err(DocumentStoreError::into_write_failed);

            span.finish(result)?;
            debug!(
                target: TRACE_TARGET,
                collection,
                index = %index.resolved_name(),
                "index ensured"
            );
        }

        Ok(())
    }

    /// Shuts down the store and releases backend resources.
    ///
    /// This consumes the store. A store that never connected shuts down trivially.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        let Some(conn) = self.connection.into_inner() else {
            return Ok(());
        };

        let kind = conn.backend.kind();
        conn.backend.shutdown().await?;
        info!(target: TRACE_TARGET, store = kind, "document store shut down");

        Ok(())
    }
}

impl DynDocumentStore {
    /// Borrows the connected backend as its concrete type.
    pub fn backend_as<T: StoreBackend + 'static>(&self) -> Option<&T> {
        self.backend()
            .and_then(|backend| (**backend).as_any().downcast_ref::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_and_missing_limits_resolve_to_default() {
        let config = StoreConfig::default();

        assert_eq!(config.resolve_limit(None), 100);
        assert_eq!(config.resolve_limit(Some(0)), 100);
        assert_eq!(config.resolve_limit(Some(7)), 7);
    }

    #[test]
    fn test_custom_default_limit() {
        let config = StoreConfig::default().with_default_limit(25);

        assert_eq!(config.resolve_limit(Some(0)), 25);
    }

    #[test]
    fn test_without_tracing_installs_a_dispatcher() {
        assert!(StoreConfig::without_tracing().dispatch.is_some());
        assert!(StoreConfig::default().dispatch.is_none());
    }
}
