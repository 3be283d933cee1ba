//! Document store contract: named collections of JSON documents keyed by id, with no
//! foreign keys, plus an optimistic multi-document transaction primitive.

mod memory;
mod transaction;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use memory::MemoryDocumentStore;
pub use transaction::{run_transaction, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    Families,
    Pairings,
    Submissions,
    BonusActivities,
    AuditLog,
    Applications,
}

impl Collection {
    pub const fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Families => "families",
            Collection::Pairings => "pairings",
            Collection::Submissions => "submissions",
            Collection::BonusActivities => "bonus_activities",
            Collection::AuditLog => "audit_log",
            Collection::Applications => "applications",
        }
    }

    /// Prefix used for generated document ids.
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Collection::Users => "usr",
            Collection::Families => "fam",
            Collection::Pairings => "par",
            Collection::Submissions => "sub",
            Collection::BonusActivities => "bon",
            Collection::AuditLog => "aud",
            Collection::Applications => "app",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Predicate over top-level document fields, using their serialized names.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    /// Matches when the field is an array holding the value.
    Contains(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn field_eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn array_contains(field: &str, value: impl Into<Value>) -> Self {
        Filter::Contains(field.to_string(), value.into())
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => document.get(field) == Some(expected),
            Filter::Contains(field, expected) => document
                .get(field)
                .and_then(Value::as_array)
                .map(|items| items.contains(expected))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(document)),
        }
    }
}

/// Document body together with the version it was read at. Absent documents carry the
/// version of their last deletion (0 if never written).
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub version: u64,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStamp {
    pub collection: Collection,
    pub id: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: Collection,
        id: String,
        document: Value,
    },
    /// Field merge into an existing document.
    Update {
        collection: Collection,
        id: String,
        fields: Map<String, Value>,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write conflict: documents changed before commit")]
    Conflict,
    #[error("document {collection}/{id} not found")]
    NotFound { collection: Collection, id: String },
    #[error("document encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction so the program core can run against any key-value store offering
/// compare-and-swap commits.
pub trait DocumentStore: Send + Sync {
    fn read_versioned(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<VersionedDocument, StoreError>;

    /// Documents matching the filter, ordered by id.
    fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    fn allocate_id(&self, collection: Collection) -> Result<String, StoreError>;

    /// Applies every write atomically, provided no read stamp is stale.
    fn commit(&self, reads: &[ReadStamp], writes: Vec<WriteOp>) -> Result<(), StoreError>;

    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_versioned(collection, id)?.body)
    }

    fn set(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        self.commit(
            &[],
            vec![WriteOp::Set {
                collection,
                id: id.to_string(),
                document,
            }],
        )
    }

    fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.commit(
            &[],
            vec![WriteOp::Update {
                collection,
                id: id.to_string(),
                fields,
            }],
        )
    }

    /// Deleting an absent document succeeds.
    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.commit(
            &[],
            vec![WriteOp::Delete {
                collection,
                id: id.to_string(),
            }],
        )
    }
}

/// Typed record living in one collection.
pub trait Document: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn document_id(&self) -> &str;
}

fn decode<D: Document>(value: Value) -> Result<D, StoreError> {
    serde_json::from_value(value).map_err(StoreError::from)
}

/// Typed helpers over any [`DocumentStore`].
pub trait DocumentStoreExt: DocumentStore {
    fn fetch<D: Document>(&self, id: &str) -> Result<Option<D>, StoreError> {
        self.get(D::COLLECTION, id)?.map(decode).transpose()
    }

    fn find<D: Document>(&self, filter: &Filter) -> Result<Vec<D>, StoreError> {
        self.query(D::COLLECTION, filter)?
            .into_iter()
            .map(decode)
            .collect()
    }

    fn put<D: Document>(&self, document: &D) -> Result<(), StoreError> {
        let value = serde_json::to_value(document)?;
        self.set(D::COLLECTION, document.document_id(), value)
    }

    fn remove<D: Document>(&self, id: &str) -> Result<(), StoreError> {
        self.delete(D::COLLECTION, id)
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}
