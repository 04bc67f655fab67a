use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, RawDocumentBuf, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection, Database, IndexModel, Namespace,
    options::{
        ClientOptions, DeleteOneModel, FindOneOptions as MongoFindOneOptions,
        FindOptions as MongoFindOptions, IndexOptions, InsertOneModel, ReadPreference,
        SelectionCriteria, UpdateModifications, UpdateOneModel, WriteModel as MongoWriteModel,
    },
};
use tracing::{info, warn};

use doctrail_core::{
    backend::{
        BulkWriteSummary, DocumentCursor, FindOneOptions, FindOptions, Pipeline, ReplaceOptions,
        StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome, WriteModel,
    },
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexSpec,
};

use crate::config::{MongoDbConfig, ReadPreferenceMode};

/// A [`StoreBackend`] over the official MongoDB async driver.
///
/// Filters, updates and pipelines are sent to the server untouched. Driver errors are
/// returned as [`DocumentStoreError::Backend`] so callers can downcast to
/// [`mongodb::error::Error`].
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    shutdown_grace: Duration,
}

impl MongoDbStore {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            database: database.into(),
            shutdown_grace: crate::config::DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn builder(uri: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(uri, database)
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> MongoCollection<T> {
        self.database().collection(name)
    }
}

fn into_mongo_model(namespace: &Namespace, model: WriteModel) -> MongoWriteModel {
    match model {
        WriteModel::InsertOne { document } => InsertOneModel::builder()
            .namespace(namespace.clone())
            .document(document)
            .build()
            .into(),
        WriteModel::UpdateOne { filter, update } => UpdateOneModel::builder()
            .namespace(namespace.clone())
            .filter(filter)
            .update(UpdateModifications::Document(update))
            .build()
            .into(),
        WriteModel::DeleteOne { filter } => DeleteOneModel::builder()
            .namespace(namespace.clone())
            .filter(filter)
            .build()
            .into(),
    }
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    fn kind(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> DocumentStoreResult<()> {
        self.database()
            .run_command(doc! { "ping": 1 })
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: BsonDocument) -> DocumentStoreResult<Bson> {
        let result = self
            .collection::<BsonDocument>(collection)
            .insert_one(document)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(result.inserted_id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let result = self
            .collection::<BsonDocument>(collection)
            .insert_many(documents)
            .await
            .map_err(DocumentStoreError::backend)?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(position, _)| *position);

        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        let mut find_options = MongoFindOptions::default();
        find_options.limit = options.limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        find_options.skip = options.skip;
        find_options.sort = options.sort;
        find_options.projection = options.projection;

        let cursor = self
            .collection::<RawDocumentBuf>(collection)
            .find(filter)
            .with_options(find_options)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(cursor.map_err(DocumentStoreError::backend).boxed())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<Option<RawDocumentBuf>> {
        let mut find_options = MongoFindOneOptions::default();
        find_options.skip = options.skip;
        find_options.sort = options.sort;
        find_options.projection = options.projection;

        self.collection::<RawDocumentBuf>(collection)
            .find_one(filter)
            .with_options(find_options)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        self.collection::<BsonDocument>(collection)
            .count_documents(filter)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.collection::<BsonDocument>(collection)
            .distinct(field, filter)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self
            .collection::<BsonDocument>(collection)
            .update_one(filter, update)
            .upsert(options.upsert)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self
            .collection::<BsonDocument>(collection)
            .update_many(filter, update)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        let result = self
            .collection::<BsonDocument>(collection)
            .delete_one(filter)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        let result = self
            .collection::<BsonDocument>(collection)
            .delete_many(filter)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(result.deleted_count)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self
            .collection::<BsonDocument>(collection)
            .replace_one(filter, replacement)
            .upsert(options.upsert)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn aggregate(&self, collection: &str, pipeline: Pipeline) -> DocumentStoreResult<DocumentCursor> {
        let cursor = self
            .collection::<BsonDocument>(collection)
            .aggregate(pipeline)
            .await
            .map_err(DocumentStoreError::backend)?
            .with_type::<RawDocumentBuf>();

        Ok(cursor.map_err(DocumentStoreError::backend).boxed())
    }

    /// Sends the batch through the client-level `bulkWrite` command in one round trip.
    ///
    /// Requires MongoDB 8.0 or later. A failure carries the driver's partial result.
    async fn bulk_write(
        &self,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> DocumentStoreResult<BulkWriteSummary> {
        let namespace = self.collection::<BsonDocument>(collection).namespace();
        let models: Vec<MongoWriteModel> = models
            .into_iter()
            .map(|model| into_mongo_model(&namespace, model))
            .collect();

        let result = self
            .client
            .bulk_write(models)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(BulkWriteSummary {
            inserted_count: count(result.inserted_count),
            matched_count: count(result.matched_count),
            modified_count: count(result.modified_count),
            deleted_count: count(result.deleted_count),
            upserted_count: count(result.upserted_count),
        })
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        let options = IndexOptions::builder()
            .name(index.resolved_name())
            .unique(index.unique)
            .sparse(index.sparse)
            .expire_after(index.expire_after)
            .build();

        self.collection::<BsonDocument>(collection)
            .create_index(IndexModel::builder().keys(index.keys.clone()).options(options).build())
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.database()
            .list_collection_names()
            .await
            .map_err(DocumentStoreError::backend)
    }

    /// Closes the connection pool, waiting at most the configured grace period.
    async fn shutdown(self) -> DocumentStoreResult<()> {
        let grace = self.shutdown_grace;
        let client = self.client;

        match tokio::time::timeout(grace, async move { client.shutdown().await }).await {
            Ok(()) => info!(database = %self.database, "mongodb client shut down"),
            Err(_) => warn!(
                database = %self.database,
                grace_secs = grace.as_secs(),
                "mongodb client did not shut down within the grace period"
            ),
        }

        Ok(())
    }
}

/// Builder for [`MongoDbStore`].
///
/// Building parses the connection string and creates the client without contacting the
/// server; reachability is checked by the store's ping on connect.
///
/// # Example
///
/// ```ignore
/// use doctrail::mongodb::{MongoDbStoreBuilder, ReadPreferenceMode};
///
/// let builder = MongoDbStoreBuilder::new("mongodb://localhost:27017", "app")
///     .with_max_pool_size(20)
///     .with_read_preference(ReadPreferenceMode::Primary);
/// store.connect(builder).await?;
/// ```
#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    config: MongoDbConfig,
}

impl MongoDbStoreBuilder {
    pub fn new(uri: &str, database: &str) -> Self {
        Self::from_config(MongoDbConfig {
            uri: uri.to_string(),
            database: database.to_string(),
            ..Default::default()
        })
    }

    pub fn from_config(config: MongoDbConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MongoDbConfig {
        &self.config
    }

    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.config.max_pool_size = Some(size);
        self
    }

    pub fn with_min_pool_size(mut self, size: u32) -> Self {
        self.config.min_pool_size = Some(size);
        self
    }

    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.config.max_idle_time_secs = Some(idle.as_secs());
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = Some(name.into());
        self
    }

    pub fn with_read_preference(mut self, mode: ReadPreferenceMode) -> Self {
        self.config.read_preference = mode;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_secs = grace.as_secs();
        self
    }

    /// Parses the connection string and overlays the configured options.
    ///
    /// Options set on the builder win over the same options in the connection string.
    pub async fn client_options(&self) -> DocumentStoreResult<ClientOptions> {
        let mut options = ClientOptions::parse(&self.config.uri)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if let Some(size) = self.config.max_pool_size {
            options.max_pool_size = Some(size);
        }
        if let Some(size) = self.config.min_pool_size {
            options.min_pool_size = Some(size);
        }
        if let Some(idle) = self.config.max_idle_time() {
            options.max_idle_time = Some(idle);
        }
        if let Some(name) = &self.config.app_name {
            options.app_name = Some(name.clone());
        }
        options.selection_criteria = Some(SelectionCriteria::ReadPreference(
            self.config.read_preference.into(),
        ));

        Ok(options)
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        if self.config.database.is_empty() {
            return Err(DocumentStoreError::Initialization(
                "database name must not be empty".to_string(),
            ));
        }

        let client = Client::with_options(self.client_options().await?)
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        info!(
            database = %self.config.database,
            read_preference = ?self.config.read_preference,
            "mongodb client created"
        );

        Ok(MongoDbStore {
            client,
            shutdown_grace: self.config.shutdown_grace(),
            database: self.config.database,
        })
    }
}
