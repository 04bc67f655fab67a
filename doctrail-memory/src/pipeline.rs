//! Aggregation stages and the sort and projection helpers shared with plain reads.

use std::cmp::Ordering;

use bson::{Bson, Document as BsonDocument};

use doctrail_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::evaluator::{Comparable, DocumentEvaluator, lookup, truthy};

/// Runs `pipeline` over `documents`.
///
/// Supported stages are `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count`.
pub(crate) fn run_pipeline(
    mut documents: Vec<BsonDocument>,
    pipeline: &[BsonDocument],
) -> DocumentStoreResult<Vec<BsonDocument>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(DocumentStoreError::backend(
                    "a pipeline stage must have exactly one field",
                ));
            }
        };

        documents = match name.as_str() {
            "$match" => DocumentEvaluator::filter_documents(documents.iter(), stage_document(name, spec)?)?,
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, spec)?);
                documents
            }
            "$skip" => {
                let skip = stage_count(name, spec)?;
                documents.into_iter().skip(skip).collect()
            }
            "$limit" => {
                let limit = stage_count(name, spec)?;
                if limit == 0 {
                    return Err(DocumentStoreError::backend("$limit must be positive"));
                }
                documents.truncate(limit);
                documents
            }
            "$project" => {
                let projection = stage_document(name, spec)?;
                documents
                    .iter()
                    .map(|document| project(document, projection))
                    .collect::<DocumentStoreResult<_>>()?
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|field| !field.is_empty() && !field.starts_with('$'))
                    .ok_or_else(|| DocumentStoreError::backend("$count needs a field name"))?;
                if documents.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = BsonDocument::new();
                    counted.insert(field, documents.len() as i64);
                    vec![counted]
                }
            }
            other => {
                return Err(DocumentStoreError::backend(format!(
                    "unsupported pipeline stage {other}"
                )));
            }
        };
    }

    Ok(documents)
}

/// Stable multi-key sort following a `{ field: 1 | -1 }` specification.
pub(crate) fn sort_documents(documents: &mut [BsonDocument], sort: &BsonDocument) {
    let keys: Vec<(&str, bool)> = sort
        .iter()
        .map(|(field, direction)| (field.as_str(), direction_of(direction)))
        .collect();

    documents.sort_by(|left, right| {
        for (field, ascending) in &keys {
            let a = lookup(left, field).map(Comparable::from).unwrap_or(Comparable::Null);
            let b = lookup(right, field).map(Comparable::from).unwrap_or(Comparable::Null);

            let ordering = if *ascending { a.sort_cmp(&b) } else { b.sort_cmp(&a) };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn direction_of(value: &Bson) -> bool {
    match value {
        Bson::Int32(n) => *n >= 0,
        Bson::Int64(n) => *n >= 0,
        Bson::Double(n) => *n >= 0.0,
        _ => true,
    }
}

/// Applies an inclusion or exclusion projection to top-level fields.
///
/// `_id` is kept unless explicitly excluded. Mixing inclusions and exclusions of other
/// fields is rejected.
pub(crate) fn project(document: &BsonDocument, projection: &BsonDocument) -> DocumentStoreResult<BsonDocument> {
    let keep_id = projection.get("_id").is_none_or(truthy);
    let fields: Vec<(&String, bool)> = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .map(|(field, flag)| (field, truthy(flag)))
        .collect();

    let inclusive = match (fields.iter().any(|(_, f)| *f), fields.iter().any(|(_, f)| !*f)) {
        (true, true) => {
            return Err(DocumentStoreError::backend(
                "projection cannot mix inclusion and exclusion",
            ));
        }
        (included, _) => included,
    };

    let mut projected = BsonDocument::new();
    if inclusive {
        if keep_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (field, _) in &fields {
            if let Some(value) = document.get(field.as_str()) {
                projected.insert(field.as_str(), value.clone());
            }
        }
    } else {
        for (key, value) in document {
            let excluded = if key == "_id" {
                !keep_id
            } else {
                fields.iter().any(|(field, _)| *field == key)
            };
            if !excluded {
                projected.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(projected)
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> DocumentStoreResult<&'a BsonDocument> {
    spec.as_document()
        .ok_or_else(|| DocumentStoreError::backend(format!("{name} needs a document")))
}

fn stage_count(name: &str, spec: &Bson) -> DocumentStoreResult<usize> {
    let count = match spec {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(n) if n.fract() == 0.0 => *n as i64,
        _ => -1,
    };

    usize::try_from(count)
        .map_err(|_| DocumentStoreError::backend(format!("{name} needs a non-negative integer")))
}
