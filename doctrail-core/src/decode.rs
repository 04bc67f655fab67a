//! Cursor and result decoding.
//!
//! Results come off the backend as raw BSON bytes. A type may supply its own decode
//! routine that reads those bytes directly; every other type goes through serde. The
//! choice is made once per cursor from the type's declared capability.

use bson::{RawDocument, deserialize_from_slice};
use futures::StreamExt;
use serde::de::DeserializeOwned;

use crate::{backend::DocumentCursor, error::DocumentStoreResult};

/// Upper bound on the slots reserved before the first document is read.
const PRESIZE_LIMIT: usize = 128;

/// A custom decode routine reading a raw BSON document.
pub type RawDecoder<T> = fn(&RawDocument) -> DocumentStoreResult<T>;

/// Types that can be materialized from a backend result.
///
/// The default implementation declares no custom routine, so serde is used. Hot-path
/// types override [`raw_decoder`](DecodeDocument::raw_decoder) to skip serde entirely:
///
/// ```ignore
/// impl DecodeDocument for Sample {
///     fn raw_decoder() -> Option<RawDecoder<Self>> {
///         Some(|raw| {
///             Ok(Sample {
///                 name: raw.get_str("name")?.to_string(),
///                 active: raw.get_bool("active")?,
///             })
///         })
///     }
/// }
/// ```
///
/// Both paths must produce identical values for the same bytes.
pub trait DecodeDocument: DeserializeOwned + Send + 'static {
    /// Returns the type's own decode routine, if it has one.
    fn raw_decoder() -> Option<RawDecoder<Self>> {
        None
    }
}

/// The decode path selected for a result type.
pub enum DecodeStrategy<T> {
    /// The type's own routine.
    Custom(RawDecoder<T>),
    /// Generic serde deserialization.
    Serde,
}

impl<T: DecodeDocument> DecodeStrategy<T> {
    /// Selects the strategy from the capability `T` declares.
    pub fn detect() -> Self {
        match T::raw_decoder() {
            Some(decoder) => DecodeStrategy::Custom(decoder),
            None => DecodeStrategy::Serde,
        }
    }
}

impl<T: DeserializeOwned> DecodeStrategy<T> {
    /// Decodes one raw document.
    pub fn decode(&self, raw: &RawDocument) -> DocumentStoreResult<T> {
        match self {
            DecodeStrategy::Custom(decoder) => decoder(raw),
            DecodeStrategy::Serde => Ok(deserialize_from_slice(raw.as_bytes())?),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, DecodeStrategy::Custom(_))
    }
}

/// Drains at most `capacity` documents from `cursor`.
///
/// `capacity` bounds the drain only; the output grows with what the cursor actually
/// yields. The first cursor or decode failure aborts the drain and no partial results
/// are returned.
pub async fn collect<T: DecodeDocument>(
    mut cursor: DocumentCursor,
    capacity: usize,
) -> DocumentStoreResult<Vec<T>> {
    let strategy = DecodeStrategy::<T>::detect();
    let mut items = Vec::with_capacity(capacity.min(PRESIZE_LIMIT));

    while items.len() < capacity {
        match cursor.next().await {
            Some(raw) => items.push(strategy.decode(&raw?)?),
            None => break,
        }
    }

    Ok(items)
}

/// Decodes a single result with the strategy `T` declares.
pub fn decode_one<T: DecodeDocument>(raw: &RawDocument) -> DocumentStoreResult<T> {
    DecodeStrategy::<T>::detect().decode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{RawDocumentBuf, doc, oid::ObjectId, serialize_to_raw_document_buf};
    use futures::stream;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    use crate::error::DocumentStoreError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        name: String,
        age: i32,
        balance: f64,
        active: bool,
        tags: Vec<String>,
        metadata: BTreeMap<String, String>,
    }

    impl DecodeDocument for Profile {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FastProfile(Profile);

    impl FastProfile {
        fn read(raw: &RawDocument) -> DocumentStoreResult<Self> {
            let id = match raw.get("_id")? {
                Some(value) => value.as_object_id(),
                None => None,
            };

            let mut tags = Vec::new();
            for value in raw.get_array("tags")? {
                if let Some(tag) = value?.as_str() {
                    tags.push(tag.to_string());
                }
            }

            let mut metadata = BTreeMap::new();
            for entry in raw.get_document("metadata")? {
                let (key, value) = entry?;
                if let Some(value) = value.as_str() {
                    metadata.insert(key.to_string(), value.to_string());
                }
            }

            Ok(FastProfile(Profile {
                id,
                name: raw.get_str("name")?.to_string(),
                age: raw.get_i32("age")?,
                balance: raw.get_f64("balance")?,
                active: raw.get_bool("active")?,
                tags,
                metadata,
            }))
        }
    }

    impl DecodeDocument for FastProfile {
        fn raw_decoder() -> Option<RawDecoder<Self>> {
            Some(FastProfile::read)
        }
    }

    fn sample(index: i32) -> Profile {
        Profile {
            id: Some(ObjectId::new()),
            name: format!("user-{index}"),
            age: 20 + index,
            balance: 10.5 * index as f64,
            active: index % 2 == 0,
            tags: vec!["a".into(), format!("t{index}")],
            metadata: BTreeMap::from([("team".to_string(), "core".to_string())]),
        }
    }

    fn raw(profile: &Profile) -> RawDocumentBuf {
        serialize_to_raw_document_buf(profile).unwrap()
    }

    fn cursor(items: Vec<DocumentStoreResult<RawDocumentBuf>>) -> DocumentCursor {
        stream::iter(items).boxed()
    }

    #[test]
    fn test_strategy_follows_declared_capability() {
        assert!(DecodeStrategy::<FastProfile>::detect().is_custom());
        assert!(!DecodeStrategy::<Profile>::detect().is_custom());
    }

    #[test]
    fn test_custom_and_serde_paths_agree() {
        let profile = sample(3);
        let bytes = raw(&profile);

        let custom = DecodeStrategy::<FastProfile>::detect().decode(&bytes).unwrap();
        let generic = DecodeStrategy::<Profile>::Serde.decode(&bytes).unwrap();

        assert_eq!(custom.0, generic);
        assert_eq!(generic, profile);
    }

    #[tokio::test]
    async fn test_collect_stops_at_capacity() {
        let items = (0..5).map(|i| Ok(raw(&sample(i)))).collect();

        let decoded: Vec<Profile> = collect(cursor(items), 3).await.unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2].name, "user-2");
        assert!(decoded.capacity() >= 3);
    }

    #[tokio::test]
    async fn test_collect_with_unbounded_capacity() {
        let items = (0..4).map(|i| Ok(raw(&sample(i)))).collect();

        let decoded: Vec<Profile> = collect(cursor(items), usize::MAX).await.unwrap();

        assert_eq!(decoded.len(), 4);
        assert!(decoded.capacity() <= PRESIZE_LIMIT);
    }

    #[tokio::test]
    async fn test_collect_uses_custom_routine() {
        let items = (0..2).map(|i| Ok(raw(&sample(i)))).collect();

        let decoded: Vec<FastProfile> = collect(cursor(items), 10).await.unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].0.name, "user-1");
    }

    #[tokio::test]
    async fn test_collect_aborts_on_cursor_error() {
        let items = vec![
            Ok(raw(&sample(0))),
            Err(DocumentStoreError::backend("cursor killed")),
        ];

        let err = collect::<Profile>(cursor(items), 10).await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::Backend(_)));
    }

    #[test]
    fn test_decode_failure_is_serialization_error() {
        let bytes = serialize_to_raw_document_buf(&doc! { "name": 42 }).unwrap();

        let err = decode_one::<Profile>(&bytes).unwrap_err();

        assert!(matches!(err, DocumentStoreError::Serialization(_)));
    }
}
