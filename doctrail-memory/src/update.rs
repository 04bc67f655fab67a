//! Update operators for in-memory documents.
//!
//! Supports `$set`, `$unset`, `$inc` and `$push`, with dotted paths creating embedded
//! documents as needed. The `_id` field is immutable.

use bson::{Bson, Document as BsonDocument};

use doctrail_core::error::{DocumentStoreError, DocumentStoreResult};

/// Applies `update` to `document` and reports whether the document changed.
pub(crate) fn apply_update(document: &mut BsonDocument, update: &BsonDocument) -> DocumentStoreResult<bool> {
    if update.is_empty() || !update.keys().all(|key| key.starts_with('$')) {
        return Err(DocumentStoreError::backend(
            "update document must contain only update operators",
        ));
    }

    let before = document.clone();

    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| DocumentStoreError::backend(format!("{op} needs a document")))?;

        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(DocumentStoreError::backend("the _id field is immutable"));
            }

            match op.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$unset" => {
                    unset_path(document, path);
                }
                "$inc" => increment(document, path, value)?,
                "$push" => push(document, path, value)?,
                other => {
                    return Err(DocumentStoreError::backend(format!(
                        "unsupported update operator {other}"
                    )));
                }
            }
        }
    }

    Ok(*document != before)
}

/// Validates a whole-document replacement.
pub(crate) fn check_replacement(replacement: &BsonDocument) -> DocumentStoreResult<()> {
    if replacement.keys().any(|key| key.starts_with('$')) {
        return Err(DocumentStoreError::backend(
            "replacement document must not contain update operators",
        ));
    }

    Ok(())
}

/// Seeds an upserted document from the equality clauses of `filter`.
pub(crate) fn seed_from_filter(filter: &BsonDocument) -> BsonDocument {
    let mut seed = BsonDocument::new();

    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }

        let value = match condition {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                match ops.get("$eq") {
                    Some(value) => value.clone(),
                    None => continue,
                }
            }
            value => value.clone(),
        };

        let _ = set_path(&mut seed, key, value);
    }

    seed
}

fn set_path(document: &mut BsonDocument, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(BsonDocument::new()));

            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                _ => Err(DocumentStoreError::backend(format!(
                    "cannot create field {rest} inside non-document field {head}"
                ))),
            }
        }
    }
}

fn unset_path(document: &mut BsonDocument, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => unset_path(inner, rest),
            _ => None,
        },
    }
}

fn get_path<'a>(document: &'a mut BsonDocument, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => document.get_mut(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => get_path(inner, rest),
            _ => None,
        },
    }
}

fn increment(document: &mut BsonDocument, path: &str, by: &Bson) -> DocumentStoreResult<()> {
    let Some(current) = get_path(document, path) else {
        return set_path(document, path, by.clone());
    };

    let sum = match (&*current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(*a as i64 + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + *b as f64),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => {
            return Err(DocumentStoreError::backend(format!(
                "cannot apply $inc to non-numeric field {path}"
            )));
        }
    };

    *current = sum;
    Ok(())
}

fn push(document: &mut BsonDocument, path: &str, value: &Bson) -> DocumentStoreResult<()> {
    match get_path(document, path) {
        None => set_path(document, path, Bson::Array(vec![value.clone()])),
        Some(Bson::Array(items)) => {
            items.push(value.clone());
            Ok(())
        }
        Some(_) => Err(DocumentStoreError::backend(format!(
            "cannot apply $push to non-array field {path}"
        ))),
    }
}
