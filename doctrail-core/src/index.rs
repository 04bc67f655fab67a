//! Index declarations and the process-wide index registry.
//!
//! Document types declare the indexes their collection needs through
//! [`Document::indexes`](crate::document::Document::indexes). Types registered with
//! [`register_indexes!`](crate::register_indexes) are collected at link time, and
//! [`DocumentStore::ensure_indexes`](crate::store::DocumentStore::ensure_indexes) applies
//! all of them in one pass.
//!
//! ```ignore
//! impl Document for User {
//!     // ...
//!     fn indexes() -> Vec<IndexSpec> {
//!         vec![
//!             IndexSpec::ascending("email").unique(),
//!             IndexSpec::descending("created_at").expire_after(Duration::from_secs(86_400)),
//!         ]
//!     }
//! }
//!
//! doctrail::register_indexes!(User);
//! ```

use bson::{Bson, Document as BsonDocument};
use std::time::Duration;

/// A single index definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    /// Ordered key specification, e.g. `{ "email": 1, "created_at": -1 }`.
    pub keys: BsonDocument,
    /// Explicit name. When absent the server-style name derived from `keys` is used.
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
    /// Time-to-live for documents indexed by a date field.
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    pub fn new(keys: BsonDocument) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }

    /// Single-field ascending index.
    pub fn ascending(field: &str) -> Self {
        Self::default().with_key(field, 1)
    }

    /// Single-field descending index.
    pub fn descending(field: &str) -> Self {
        Self::default().with_key(field, -1)
    }

    /// Appends a key to a compound index.
    pub fn with_key(mut self, field: &str, direction: i32) -> Self {
        self.keys.insert(field, direction);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// The index name, deriving `field_1_other_-1` from the keys when none was set.
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        self.keys
            .iter()
            .map(|(field, direction)| format!("{field}_{}", key_suffix(direction)))
            .collect::<Vec<_>>()
            .join("_")
    }
}

fn key_suffix(direction: &Bson) -> String {
    match direction {
        Bson::Int32(value) => value.to_string(),
        Bson::Int64(value) => value.to_string(),
        Bson::Double(value) if value.fract() == 0.0 => (*value as i64).to_string(),
        Bson::String(kind) => kind.clone(),
        other => other.to_string(),
    }
}

/// A link-time registration of one document type's indexes.
///
/// Created by [`register_indexes!`](crate::register_indexes); not meant to be built by hand.
#[doc(hidden)]
pub struct IndexRegistration {
    collection_ptr: fn() -> &'static str,
    indexes_ptr: fn() -> Vec<IndexSpec>,
}

impl IndexRegistration {
    pub const fn new(
        collection_ptr: fn() -> &'static str,
        indexes_ptr: fn() -> Vec<IndexSpec>,
    ) -> Self {
        Self {
            collection_ptr,
            indexes_ptr,
        }
    }

    pub fn collection_name(&self) -> &'static str {
        (self.collection_ptr)()
    }

    pub fn indexes(&self) -> Vec<IndexSpec> {
        (self.indexes_ptr)()
    }
}

inventory::collect!(IndexRegistration);

/// Every registration submitted anywhere in the final binary.
pub fn registered_indexes() -> impl Iterator<Item = &'static IndexRegistration> {
    inventory::iter::<IndexRegistration>.into_iter()
}

/// Registers document types so their indexes are applied by `ensure_indexes`.
///
/// ```ignore
/// doctrail::register_indexes!(User, Order);
/// ```
#[macro_export]
macro_rules! register_indexes {
    ($($ty:ty),+ $(,)?) => {
        $(
            $crate::__private::inventory::submit! {
                $crate::index::IndexRegistration::new(
                    <$ty as $crate::document::Document>::collection_name,
                    <$ty as $crate::document::Document>::indexes,
                )
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use serde::{Deserialize, Serialize};

    use crate::{decode::DecodeDocument, document::Document, error::DocumentStoreResult};

    #[derive(Debug, Serialize, Deserialize)]
    struct AuditEntry {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        actor: String,
    }

    impl DecodeDocument for AuditEntry {}

    impl Document for AuditEntry {
        fn collection_name() -> &'static str {
            "index_registry_audit"
        }

        fn id(&self) -> Option<Bson> {
            self.id.map(Bson::ObjectId)
        }

        fn set_id(&mut self, id: Bson) -> DocumentStoreResult<()> {
            self.id = Some(bson::deserialize_from_bson(id)?);
            Ok(())
        }

        fn indexes() -> Vec<IndexSpec> {
            vec![IndexSpec::ascending("actor").unique()]
        }
    }

    crate::register_indexes!(AuditEntry);

    #[test]
    fn test_resolved_name_follows_server_convention() {
        let compound = IndexSpec::ascending("email").with_key("created_at", -1);

        assert_eq!(compound.resolved_name(), "email_1_created_at_-1");
        assert_eq!(IndexSpec::new(doc! { "bio": "text" }).resolved_name(), "bio_text");
        assert_eq!(compound.with_name("by_email").resolved_name(), "by_email");
    }

    #[test]
    fn test_builder_flags() {
        let spec = IndexSpec::descending("seen_at")
            .sparse()
            .expire_after(Duration::from_secs(60));

        assert_eq!(spec.keys, doc! { "seen_at": -1 });
        assert!(spec.sparse);
        assert!(!spec.unique);
        assert_eq!(spec.expire_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_registered_type_is_collected() {
        let registration = registered_indexes()
            .find(|r| r.collection_name() == "index_registry_audit")
            .expect("registration is collected");

        assert_eq!(registration.indexes(), vec![IndexSpec::ascending("actor").unique()]);
    }
}
