#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use doctrail::{
    Document,
    backend::{
        BulkWriteSummary, DocumentCursor, FindOneOptions, FindOptions, Pipeline, ReplaceOptions,
        StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome, WriteModel,
    },
    bson::{Bson, Document as BsonDocument, RawDocument, RawDocumentBuf, doc, oid::ObjectId},
    decode::{DecodeDocument, RawDecoder},
    document::AggregateDescriptor,
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    index::IndexSpec,
    store::{DocumentStore, StoreConfig},
    memory::InMemoryStore,
};
use serde::{Deserialize, Serialize};
use tracing::{
    Dispatch, Event, Subscriber,
    field::{Field, Visit},
    span::{Attributes, Id, Record},
};
use tracing_subscriber::{
    Registry,
    layer::{Context, Layer, SubscriberExt},
    registry::LookupSpan,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[document(collection = "users", validate = "User::check", indexes = "User::declared_indexes")]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub active: bool,
}

impl User {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            age,
            active: true,
        }
    }

    fn check(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("name is required"));
        }
        Ok(())
    }

    fn declared_indexes() -> Vec<IndexSpec> {
        vec![
            IndexSpec::ascending("email").unique(),
            IndexSpec::descending("age"),
        ]
    }
}

doctrail::register_indexes!(User);

/// The active users view, youngest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Document)]
#[document(collection = "users")]
pub struct ActiveUser {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub age: i32,
}

impl AggregateDescriptor for ActiveUser {
    fn build_pipeline(&self, filter: BsonDocument) -> Pipeline {
        vec![
            doc! { "$match": filter },
            doc! { "$match": { "active": true } },
            doc! { "$sort": { "age": 1 } },
            doc! { "$project": { "name": 1, "age": 1 } },
        ]
    }
}

/// A sensor reading with a hand-written decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[document(collection = "readings", custom_decode)]
pub struct Reading {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub sensor: String,
    pub value: f64,
    pub samples: Vec<i32>,
}

impl Reading {
    pub fn new(sensor: &str, value: f64) -> Self {
        Self {
            id: None,
            sensor: sensor.to_string(),
            value,
            samples: vec![1, 2, 3],
        }
    }

    fn read(raw: &RawDocument) -> DocumentStoreResult<Self> {
        let id = match raw.get("_id")? {
            Some(value) => value.as_object_id(),
            None => None,
        };

        let mut samples = Vec::new();
        for value in raw.get_array("samples")? {
            if let Some(sample) = value?.as_i32() {
                samples.push(sample);
            }
        }

        Ok(Reading {
            id,
            sensor: raw.get_str("sensor")?.to_string(),
            value: raw.get_f64("value")?,
            samples,
        })
    }
}

impl DecodeDocument for Reading {
    fn raw_decoder() -> Option<RawDecoder<Self>> {
        Some(Reading::read)
    }
}

/// A note whose unsaved identity serializes as `_id: null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[document(collection = "memos")]
pub struct Memo {
    #[serde(rename = "_id")]
    pub id: Option<ObjectId>,
    pub body: String,
}

impl Memo {
    pub fn new(body: &str) -> Self {
        Self {
            id: None,
            body: body.to_string(),
        }
    }
}

/// A document keyed by a number the backend never generates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[document(collection = "tickets")]
pub struct Ticket {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
}

/// Shared switches and counters between a test and its [`FlakyBackend`].
#[derive(Debug, Default)]
pub struct Controls {
    pub builds: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub fail_build: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_shutdown: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub report_not_found: AtomicBool,
    /// Every document handed to the backend for insertion or replacement.
    pub sent: Mutex<Vec<BsonDocument>>,
}

impl Controls {
    fn record(&self, document: &BsonDocument) {
        self.sent.lock().unwrap().push(document.clone());
    }

    pub fn sent(&self) -> Vec<BsonDocument> {
        self.sent.lock().unwrap().clone()
    }
}

/// An in-memory backend whose failures are switched on by the test.
#[derive(Debug)]
pub struct FlakyBackend {
    inner: InMemoryStore,
    controls: Arc<Controls>,
}

impl FlakyBackend {
    fn read_guard(&self) -> DocumentStoreResult<()> {
        if self.controls.fail_reads.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::backend("read refused"));
        }
        Ok(())
    }

    fn write_guard(&self) -> DocumentStoreResult<()> {
        if self.controls.fail_writes.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::backend("write refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for FlakyBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> DocumentStoreResult<()> {
        if self.controls.fail_ping.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::backend("ping refused"));
        }
        self.inner.ping().await
    }

    async fn insert_one(&self, collection: &str, document: BsonDocument) -> DocumentStoreResult<Bson> {
        self.write_guard()?;
        self.controls.record(&document);
        self.inner.insert_one(collection, document).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.write_guard()?;
        self.inner.insert_many(collection, documents).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        self.read_guard()?;
        if self.controls.report_not_found.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::NotFound(collection.to_string()));
        }
        self.inner.find(collection, filter, options).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<Option<RawDocumentBuf>> {
        self.read_guard()?;
        self.inner.find_one(collection, filter, options).await
    }

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        self.read_guard()?;
        self.inner.count_documents(collection, filter).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.read_guard()?;
        self.inner.distinct(collection, field, filter).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write_guard()?;
        self.inner.update_one(collection, filter, update, options).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write_guard()?;
        self.inner.update_many(collection, filter, update).await
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        self.write_guard()?;
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        self.write_guard()?;
        self.inner.delete_many(collection, filter).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write_guard()?;
        self.controls.record(&replacement);
        self.inner.replace_one(collection, filter, replacement, options).await
    }

    async fn aggregate(&self, collection: &str, pipeline: Pipeline) -> DocumentStoreResult<DocumentCursor> {
        self.read_guard()?;
        self.inner.aggregate(collection, pipeline).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> DocumentStoreResult<BulkWriteSummary> {
        self.controls.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.write_guard()?;
        for model in &models {
            if let WriteModel::InsertOne { document } = model {
                self.controls.record(document);
            }
        }
        self.inner.bulk_write(collection, models).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        self.write_guard()?;
        self.inner.create_index(collection, index).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.read_guard()?;
        self.inner.list_collections().await
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.controls.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.controls.fail_shutdown.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::backend("shutdown refused"));
        }
        self.inner.shutdown().await
    }
}

/// Builds a [`FlakyBackend`] over a shared in-memory store.
#[derive(Debug, Clone)]
pub struct FlakyBuilder {
    store: InMemoryStore,
    controls: Arc<Controls>,
    delay: Option<Duration>,
}

impl FlakyBuilder {
    pub fn new(store: InMemoryStore, controls: Arc<Controls>) -> Self {
        Self {
            store,
            controls,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for FlakyBuilder {
    type Backend = FlakyBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        self.controls.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.controls.fail_build.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Initialization("no route to store".into()));
        }

        Ok(FlakyBackend {
            inner: self.store,
            controls: self.controls,
        })
    }
}

/// A connected store plus the handles a test inspects it through.
pub struct Harness {
    pub store: DocumentStore<FlakyBackend>,
    pub memory: InMemoryStore,
    pub controls: Arc<Controls>,
}

impl Harness {
    pub async fn connected() -> Self {
        Self::connected_with(StoreConfig::default()).await
    }

    pub async fn connected_with(config: StoreConfig) -> Self {
        let harness = Self::unconnected_with(config);
        harness
            .store
            .connect(harness.builder())
            .await
            .expect("in-memory store connects");
        harness
    }

    pub fn unconnected_with(config: StoreConfig) -> Self {
        Self {
            store: DocumentStore::with_config(config),
            memory: InMemoryStore::new(),
            controls: Arc::new(Controls::default()),
        }
    }

    pub fn builder(&self) -> FlakyBuilder {
        FlakyBuilder::new(self.memory.clone(), self.controls.clone())
    }

    /// Inserts users straight through the backend, bypassing the facade.
    pub async fn seed_users(&self, count: usize) {
        let documents = (0..count)
            .map(|index| {
                doc! {
                    "name": format!("user-{index}"),
                    "email": format!("user-{index}@example.com"),
                    "age": 20 + (index % 50) as i32,
                    "active": index % 2 == 0,
                }
            })
            .collect();

        self.memory
            .insert_many("users", documents)
            .await
            .expect("seed users");
    }
}

/// One span as seen by [`CaptureLayer`].
#[derive(Debug, Clone, Default)]
pub struct SpanRecord {
    pub fields: HashMap<String, String>,
    pub events: usize,
    pub closed: bool,
}

impl SpanRecord {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

struct Fields<'a>(&'a mut HashMap<String, String>);

impl Visit for Fields<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

#[derive(Debug, Default)]
struct Captured {
    spans: Vec<SpanRecord>,
    live: HashMap<u64, usize>,
    loose: Vec<HashMap<String, String>>,
}

/// Records every span, keyed by span id, so interleaved spans are told apart.
#[derive(Debug, Clone, Default)]
pub struct CaptureLayer(Arc<Mutex<Captured>>);

impl CaptureLayer {
    pub fn dispatch(&self) -> Dispatch {
        Dispatch::new(Registry::default().with(self.clone()))
    }

    /// Operation spans in creation order, skipping the connect-time controls.
    pub fn operations(&self) -> Vec<SpanRecord> {
        self.0
            .lock()
            .unwrap()
            .spans
            .iter()
            .filter(|span| span.fields.contains_key("otel.name"))
            .cloned()
            .collect()
    }

    /// Fields of events logged outside any span, with their level under `level`.
    pub fn loose_events(&self) -> Vec<HashMap<String, String>> {
        self.0.lock().unwrap().loose.clone()
    }

    pub fn operation(&self, name: &str) -> Option<SpanRecord> {
        self.operations()
            .into_iter()
            .find(|span| span.get("otel.name") == Some(name))
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
        let mut record = SpanRecord::default();
        attrs.record(&mut Fields(&mut record.fields));

        let mut captured = self.0.lock().unwrap();
        let index = captured.spans.len();
        captured.spans.push(record);
        captured.live.insert(id.into_u64(), index);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut captured = self.0.lock().unwrap();
        if let Some(&index) = captured.live.get(&id.into_u64()) {
            values.record(&mut Fields(&mut captured.spans[index].fields));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let parent = event
            .parent()
            .cloned()
            .or_else(|| ctx.current_span().id().cloned());

        let mut captured = self.0.lock().unwrap();
        match parent.and_then(|id| captured.live.get(&id.into_u64()).copied()) {
            Some(index) => captured.spans[index].events += 1,
            None => {
                let mut fields = HashMap::new();
                event.record(&mut Fields(&mut fields));
                fields.insert("level".to_string(), event.metadata().level().to_string());
                captured.loose.push(fields);
            }
        }
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let mut captured = self.0.lock().unwrap();
        if let Some(index) = captured.live.remove(&id.into_u64()) {
            captured.spans[index].closed = true;
        }
    }
}
