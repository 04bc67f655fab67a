//! In-memory storage implementation for document stores.
//!
//! Collections are ordered lists of BSON documents behind one async-aware read-write
//! lock. Filters, updates and pipelines are interpreted by the sibling modules.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, RawDocumentBuf, oid::ObjectId};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use thiserror::Error;

use doctrail_core::{
    backend::{
        BulkWriteSummary, DocumentCursor, FindOneOptions, FindOptions, Pipeline, ReplaceOptions,
        StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome, WriteModel,
    },
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexSpec,
};

use crate::{
    evaluator::{Comparable, DocumentEvaluator, lookup},
    pipeline::{project, run_pipeline, sort_documents},
    update::{apply_update, check_replacement, seed_from_filter},
};

type StoreMap = HashMap<String, Collection>;

/// One collection: documents in insertion order plus the indexes declared on it.
#[derive(Debug, Default)]
struct Collection {
    documents: Vec<BsonDocument>,
    indexes: BTreeMap<String, IndexSpec>,
}

/// Reported as the source of a failed [`StoreBackend::bulk_write`].
///
/// Writes before `index` were applied and are counted in `summary`.
#[derive(Debug, Error)]
#[error("bulk write stopped at operation {index}: {source}")]
pub struct BulkWriteFailure {
    pub index: usize,
    pub summary: BulkWriteSummary,
    #[source]
    pub source: DocumentStoreError,
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it
/// to be shared across async tasks. Clones see the same data.
///
/// Reads scan every document of a collection. Unique indexes are enforced on insert,
/// update and replace; other index options are recorded but have no effect.
///
/// # Example
///
/// ```ignore
/// use doctrail_memory::InMemoryStore;
/// use doctrail::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert_one("users", doc! { "name": "Alice", "age": 30 }).await?;
/// assert_eq!(store.count_documents("users", doc! {}).await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Names of the indexes declared on `collection`, sorted.
    pub async fn index_names(&self, collection: &str) -> Vec<String> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|c| c.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// A copy of every document in `collection`, in insertion order.
    pub async fn snapshot(&self, collection: &str) -> Vec<BsonDocument> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    async fn matching(
        &self,
        collection: &str,
        filter: &BsonDocument,
    ) -> DocumentStoreResult<Vec<BsonDocument>> {
        match self.store.read().await.get(collection) {
            Some(c) => DocumentEvaluator::filter_documents(c.documents.iter(), filter),
            None => Ok(Vec::new()),
        }
    }
}

impl Collection {
    fn positions(&self, filter: &BsonDocument) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (position, document) in self.documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    fn first_position(&self, filter: &BsonDocument) -> DocumentStoreResult<Option<usize>> {
        for (position, document) in self.documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    fn insert(&mut self, name: &str, document: BsonDocument) -> DocumentStoreResult<Bson> {
        let (id, document) = with_identity(document);

        if self.documents.iter().any(|d| d.get("_id") == Some(&id)) {
            return Err(DocumentStoreError::DocumentAlreadyExists(
                id.to_string(),
                name.to_string(),
            ));
        }
        self.check_unique(name, &document, None)?;

        self.documents.push(document);
        Ok(id)
    }

    fn update_first(
        &mut self,
        name: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        match self.first_position(filter)? {
            Some(position) => {
                let mut updated = self.documents[position].clone();
                let modified = apply_update(&mut updated, update)?;
                if modified {
                    self.check_unique(name, &updated, Some(position))?;
                    self.documents[position] = updated;
                }

                Ok(UpdateOutcome {
                    matched_count: 1,
                    modified_count: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if upsert => {
                let mut seeded = seed_from_filter(filter);
                apply_update(&mut seeded, update)?;
                let id = self.insert(name, seeded)?;

                Ok(UpdateOutcome {
                    upserted_id: Some(id),
                    ..Default::default()
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    fn update_all(
        &mut self,
        name: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let positions = self.positions(filter)?;

        let mut changes = Vec::new();
        for &position in &positions {
            let mut updated = self.documents[position].clone();
            if apply_update(&mut updated, update)? {
                changes.push((position, updated));
            }
        }
        for (position, updated) in &changes {
            self.check_unique(name, updated, Some(*position))?;
        }

        let modified_count = changes.len() as u64;
        for (position, updated) in changes {
            self.documents[position] = updated;
        }

        Ok(UpdateOutcome {
            matched_count: positions.len() as u64,
            modified_count,
            upserted_id: None,
        })
    }

    fn delete(&mut self, filter: &BsonDocument, many: bool) -> DocumentStoreResult<u64> {
        let mut positions = if many {
            self.positions(filter)?
        } else {
            self.first_position(filter)?.into_iter().collect()
        };

        let deleted = positions.len() as u64;
        positions.reverse();
        for position in positions {
            self.documents.remove(position);
        }

        Ok(deleted)
    }

    fn replace_first(
        &mut self,
        name: &str,
        filter: &BsonDocument,
        replacement: BsonDocument,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        check_replacement(&replacement)?;

        match self.first_position(filter)? {
            Some(position) => {
                let current = &self.documents[position];
                let id = current.get("_id").cloned().unwrap_or(Bson::Null);
                if replacement.get("_id").is_some_and(|new_id| *new_id != id) {
                    return Err(DocumentStoreError::backend("the _id field is immutable"));
                }

                let mut replaced = BsonDocument::new();
                replaced.insert("_id", id);
                for (key, value) in replacement {
                    if key != "_id" {
                        replaced.insert(key, value);
                    }
                }

                let modified = replaced != *current;
                if modified {
                    self.check_unique(name, &replaced, Some(position))?;
                    self.documents[position] = replaced;
                }

                Ok(UpdateOutcome {
                    matched_count: 1,
                    modified_count: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if upsert => {
                let mut seeded = replacement;
                if !seeded.contains_key("_id") {
                    if let Some(id) = seed_from_filter(filter).get("_id") {
                        seeded.insert("_id", id.clone());
                    }
                }
                let id = self.insert(name, seeded)?;

                Ok(UpdateOutcome {
                    upserted_id: Some(id),
                    ..Default::default()
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    fn apply(&mut self, name: &str, model: WriteModel, summary: &mut BulkWriteSummary) -> DocumentStoreResult<()> {
        match model {
            WriteModel::InsertOne { document } => {
                self.insert(name, document)?;
                summary.inserted_count += 1;
            }
            WriteModel::UpdateOne { filter, update } => {
                let outcome = self.update_first(name, &filter, &update, false)?;
                summary.matched_count += outcome.matched_count;
                summary.modified_count += outcome.modified_count;
            }
            WriteModel::DeleteOne { filter } => {
                summary.deleted_count += self.delete(&filter, false)?;
            }
        }
        Ok(())
    }

    fn check_unique(&self, name: &str, candidate: &BsonDocument, skip: Option<usize>) -> DocumentStoreResult<()> {
        for (index_name, index) in self.indexes.iter().filter(|(_, index)| index.unique) {
            let key = index_key(index, candidate);
            if index.sparse && key.iter().all(Option::is_none) {
                continue;
            }

            let taken = self
                .documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .any(|(_, other)| same_key(&key, &index_key(index, other)));

            if taken {
                return Err(DocumentStoreError::DocumentAlreadyExists(
                    format!("with duplicate key for index {index_name}"),
                    name.to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn index_key<'a>(index: &IndexSpec, document: &'a BsonDocument) -> Vec<Option<&'a Bson>> {
    index.keys.keys().map(|field| lookup(document, field)).collect()
}

fn same_key(left: &[Option<&Bson>], right: &[Option<&Bson>]) -> bool {
    left.iter().zip(right).all(|(a, b)| {
        let a = a.map(Comparable::from).unwrap_or(Comparable::Null);
        let b = b.map(Comparable::from).unwrap_or(Comparable::Null);
        a == b
    })
}

/// Returns the document's `_id`, generating an `ObjectId` placed first when missing.
fn with_identity(document: BsonDocument) -> (Bson, BsonDocument) {
    if let Some(id) = document.get("_id") {
        return (id.clone(), document);
    }

    let id = Bson::ObjectId(ObjectId::new());
    let mut identified = BsonDocument::new();
    identified.insert("_id", id.clone());
    for (key, value) in document {
        identified.insert(key, value);
    }
    (id, identified)
}

fn into_cursor(documents: Vec<BsonDocument>) -> DocumentCursor {
    stream::iter(documents)
        .map(|document| bson::serialize_to_raw_document_buf(&document).map_err(DocumentStoreError::from))
        .boxed()
}

fn window(
    mut documents: Vec<BsonDocument>,
    sort: Option<&BsonDocument>,
    skip: Option<u64>,
    limit: Option<usize>,
    projection: Option<&BsonDocument>,
) -> DocumentStoreResult<Vec<BsonDocument>> {
    if let Some(sort) = sort {
        sort_documents(&mut documents, sort);
    }

    let skip = skip.map_or(0, |skip| usize::try_from(skip).unwrap_or(usize::MAX));
    let documents = documents
        .into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX));

    match projection {
        Some(projection) => documents.map(|d| project(&d, projection)).collect(),
        None => Ok(documents.collect()),
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> DocumentStoreResult<()> {
        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: BsonDocument) -> DocumentStoreResult<Bson> {
        let mut store = self.store.write().await;
        store
            .entry(collection.to_string())
            .or_default()
            .insert(collection, document)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let target = store.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(target.insert(collection, document)?);
        }

        Ok(ids)
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        let matched = self.matching(collection, &filter).await?;
        let documents = window(
            matched,
            options.sort.as_ref(),
            options.skip,
            options.limit,
            options.projection.as_ref(),
        )?;

        Ok(into_cursor(documents))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOneOptions,
    ) -> DocumentStoreResult<Option<RawDocumentBuf>> {
        let matched = self.matching(collection, &filter).await?;
        let first = window(
            matched,
            options.sort.as_ref(),
            options.skip,
            Some(1),
            options.projection.as_ref(),
        )?
        .into_iter()
        .next();

        first
            .map(|document| bson::serialize_to_raw_document_buf(&document).map_err(DocumentStoreError::from))
            .transpose()
    }

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        Ok(self.matching(collection, &filter).await?.len() as u64)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: BsonDocument,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let matched = self.matching(collection, &filter).await?;

        let mut values: Vec<Bson> = Vec::new();
        for document in &matched {
            let candidates = match lookup(document, field) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };

            for candidate in candidates {
                let seen = values
                    .iter()
                    .any(|value| Comparable::from(value) == Comparable::from(&candidate));
                if !seen {
                    values.push(candidate);
                }
            }
        }

        Ok(values)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        if options.upsert {
            return store
                .entry(collection.to_string())
                .or_default()
                .update_first(collection, &filter, &update, true);
        }

        match store.get_mut(collection) {
            Some(target) => target.update_first(collection, &filter, &update, false),
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        match store.get_mut(collection) {
            Some(target) => target.update_all(collection, &filter, &update),
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        match store.get_mut(collection) {
            Some(target) => target.delete(&filter, false),
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        match store.get_mut(collection) {
            Some(target) => target.delete(&filter, true),
            None => Ok(0),
        }
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ReplaceOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        if options.upsert {
            return store
                .entry(collection.to_string())
                .or_default()
                .replace_first(collection, &filter, replacement, true);
        }

        match store.get_mut(collection) {
            Some(target) => target.replace_first(collection, &filter, replacement, false),
            None => {
                check_replacement(&replacement)?;
                Ok(UpdateOutcome::default())
            }
        }
    }

    async fn aggregate(&self, collection: &str, pipeline: Pipeline) -> DocumentStoreResult<DocumentCursor> {
        let documents = self.snapshot(collection).await;
        let output = run_pipeline(documents, &pipeline)?;

        Ok(into_cursor(output))
    }

    async fn bulk_write(
        &self,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> DocumentStoreResult<BulkWriteSummary> {
        let mut store = self.store.write().await;
        let target = store.entry(collection.to_string()).or_default();

        let mut summary = BulkWriteSummary::default();
        for (index, model) in models.into_iter().enumerate() {
            if let Err(source) = target.apply(collection, model, &mut summary) {
                return Err(DocumentStoreError::backend(BulkWriteFailure {
                    index,
                    summary,
                    source,
                }));
            }
        }

        Ok(summary)
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        let name = index.resolved_name();
        let normalized = index.clone().with_name(name.clone());

        let mut store = self.store.write().await;
        let target = store.entry(collection.to_string()).or_default();

        match target.indexes.get(&name) {
            Some(existing) if *existing == normalized => Ok(()),
            Some(_) => Err(DocumentStoreError::backend(format!(
                "index {name} already exists on {collection} with different options"
            ))),
            None => {
                target.indexes.insert(name, normalized);
                Ok(())
            }
        }
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names: Vec<String> = self.store.read().await.keys().cloned().collect();
        names.sort();

        Ok(names)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// By default every build produces a fresh, empty store. [`with_store`](Self::with_store)
/// hands an existing store to the facade instead, so a test can keep a clone and
/// inspect what was written.
///
/// # Example
///
/// ```ignore
/// use doctrail_memory::{InMemoryStore, InMemoryStoreBuilder};
///
/// let shared = InMemoryStore::new();
/// store.connect(InMemoryStoreBuilder::new().with_store(shared.clone())).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    store: Option<InMemoryStore>,
}

impl InMemoryStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `store` instead of creating an empty one.
    pub fn with_store(mut self, store: InMemoryStore) -> Self {
        self.store = Some(store);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(self.store.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;

    fn to_document(raw: &RawDocumentBuf) -> BsonDocument {
        bson::deserialize_from_slice(raw.as_bytes()).unwrap()
    }

    async fn drain(cursor: DocumentCursor) -> Vec<BsonDocument> {
        cursor
            .map_ok(|raw| to_document(&raw))
            .try_collect()
            .await
            .unwrap()
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_many(
                "people",
                vec![
                    doc! { "_id": 1, "name": "Ann", "age": 30, "tags": ["a", "b"] },
                    doc! { "_id": 2, "name": "Bo", "age": 25, "tags": ["b"] },
                    doc! { "_id": 3, "name": "Cy", "age": 41 },
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_generates_leading_object_id() {
        let store = InMemoryStore::new();

        let id = store.insert_one("notes", doc! { "body": "hi" }).await.unwrap();

        assert!(matches!(id, Bson::ObjectId(_)));
        let stored = store.snapshot("notes").await;
        assert_eq!(stored[0].keys().next().map(String::as_str), Some("_id"));
        assert_eq!(stored[0].get("_id"), Some(&id));
    }

    #[tokio::test]
    async fn test_null_id_is_stored_as_given() {
        let store = InMemoryStore::new();

        let id = store
            .insert_one("notes", doc! { "_id": Bson::Null, "body": "hi" })
            .await
            .unwrap();
        assert_eq!(id, Bson::Null);

        let err = store
            .insert_one("notes", doc! { "_id": Bson::Null, "body": "again" })
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(_, _)));
    }

    #[tokio::test]
    async fn test_unmatched_writes_do_not_create_the_collection() {
        let store = InMemoryStore::new();

        let set = doc! { "$set": { "seen": true } };

        let updated = store
            .update_one("ghosts", doc! {}, set.clone(), UpdateOptions::default())
            .await
            .unwrap();
        let replaced = store
            .replace_one("ghosts", doc! {}, doc! { "seen": true }, ReplaceOptions::default())
            .await
            .unwrap();

        assert_eq!(updated, UpdateOutcome::default());
        assert_eq!(replaced, UpdateOutcome::default());
        assert!(store.list_collections().await.unwrap().is_empty());

        store
            .update_one("ghosts", doc! { "name": "Di" }, set, UpdateOptions::upsert())
            .await
            .unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["ghosts".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let store = seeded().await;

        let err = store.insert_one("people", doc! { "_id": 1 }).await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(_, _)));
    }

    #[tokio::test]
    async fn test_find_applies_window_and_projection() {
        let store = seeded().await;

        let cursor = store
            .find(
                "people",
                doc! { "age": { "$gte": 25 } },
                FindOptions::default()
                    .with_sort(doc! { "age": -1 })
                    .with_skip(1)
                    .with_limit(1)
                    .with_projection(doc! { "name": 1 }),
            )
            .await
            .unwrap();

        assert_eq!(drain(cursor).await, vec![doc! { "_id": 1, "name": "Ann" }]);
    }

    #[tokio::test]
    async fn test_find_on_unknown_collection_is_empty() {
        let store = InMemoryStore::new();

        let cursor = store.find("ghosts", doc! {}, FindOptions::default()).await.unwrap();

        assert!(drain(cursor).await.is_empty());
        assert!(store.find_one("ghosts", doc! {}, FindOneOptions::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_distinct_unwinds_arrays() {
        let store = seeded().await;

        let tags = store.distinct("people", "tags", doc! {}).await.unwrap();

        assert_eq!(tags, vec![Bson::from("a"), Bson::from("b")]);
    }

    #[tokio::test]
    async fn test_update_and_upsert() {
        let store = seeded().await;

        let outcome = store
            .update_many("people", doc! { "age": { "$lt": 35 } }, doc! { "$inc": { "age": 1 } })
            .await
            .unwrap();
        assert_eq!((outcome.matched_count, outcome.modified_count), (2, 2));

        let outcome = store
            .update_one(
                "people",
                doc! { "name": "Di" },
                doc! { "$set": { "age": 19 } },
                UpdateOptions::upsert(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 0);
        assert!(outcome.upserted_id.is_some());
        assert_eq!(store.count_documents("people", doc! { "name": "Di", "age": 19 }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_identity() {
        let store = seeded().await;

        let outcome = store
            .replace_one("people", doc! { "_id": 2 }, doc! { "name": "Bob" }, ReplaceOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.modified_count, 1);
        let bob = store
            .find_one("people", doc! { "_id": 2 }, FindOneOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(to_document(&bob), doc! { "_id": 2, "name": "Bob" });
    }

    #[tokio::test]
    async fn test_delete_one_and_many() {
        let store = seeded().await;

        assert_eq!(store.delete_one("people", doc! { "age": { "$gt": 0 } }).await.unwrap(), 1);
        assert_eq!(store.delete_many("people", doc! {}).await.unwrap(), 2);
        assert_eq!(store.delete_many("ghosts", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_write_is_ordered_and_stops_at_first_error() {
        let store = seeded().await;

        let err = store
            .bulk_write(
                "people",
                vec![
                    WriteModel::InsertOne { document: doc! { "_id": 4, "name": "Di" } },
                    WriteModel::InsertOne { document: doc! { "_id": 1, "name": "dup" } },
                    WriteModel::DeleteOne { filter: doc! { "_id": 2 } },
                ],
            )
            .await
            .unwrap_err();

        let DocumentStoreError::Backend(source) = err else {
            panic!("expected a backend error");
        };
        let failure = source.downcast_ref::<BulkWriteFailure>().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.summary.inserted_count, 1);
        assert_eq!(store.count_documents("people", doc! {}).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_unique_index_is_enforced_and_idempotent() {
        let store = seeded().await;
        let index = IndexSpec::ascending("name").unique();

        store.create_index("people", &index).await.unwrap();
        store.create_index("people", &index).await.unwrap();
        assert!(store.create_index("people", &IndexSpec::ascending("name")).await.is_err());
        assert_eq!(store.index_names("people").await, vec!["name_1".to_string()]);

        let err = store.insert_one("people", doc! { "name": "Ann" }).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(_, _)));
    }

    #[tokio::test]
    async fn test_aggregate_and_list_collections() {
        let store = seeded().await;
        store.insert_one("notes", doc! {}).await.unwrap();

        let cursor = store
            .aggregate("people", vec![doc! { "$match": { "age": { "$gt": 26 } } }, doc! { "$count": "n" }])
            .await
            .unwrap();

        assert_eq!(drain(cursor).await, vec![doc! { "n": 2_i64 }]);
        assert_eq!(store.list_collections().await.unwrap(), vec!["notes", "people"]);
    }

    #[tokio::test]
    async fn test_builder_shares_existing_store() {
        let shared = seeded().await;

        let built = InMemoryStoreBuilder::new().with_store(shared.clone()).build().await.unwrap();
        built.insert_one("people", doc! { "_id": 9 }).await.unwrap();

        assert_eq!(shared.count_documents("people", doc! {}).await.unwrap(), 4);
    }
}
