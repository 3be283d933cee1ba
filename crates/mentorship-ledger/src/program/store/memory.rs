use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::{
    Collection, DocumentStore, Filter, ReadStamp, StoreError, VersionedDocument, WriteOp,
};

type DocumentKey = (Collection, String);

/// In-process document store. Every write bumps a per-document version that outlives
/// deletion, so a transaction that read an absent document still detects a later insert.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<Collection, BTreeMap<String, Value>>,
    versions: HashMap<DocumentKey, u64>,
    sequences: HashMap<Collection, u64>,
}

impl MemoryState {
    fn version(&self, collection: Collection, id: &str) -> u64 {
        self.versions
            .get(&(collection, id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn document(&self, collection: Collection, id: &str) -> Option<&Value> {
        self.documents
            .get(&collection)
            .and_then(|documents| documents.get(id))
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }

    /// Number of documents currently stored in the collection.
    pub fn len(&self, collection: Collection) -> Result<usize, StoreError> {
        let state = self.lock()?;
        Ok(state
            .documents
            .get(&collection)
            .map(BTreeMap::len)
            .unwrap_or(0))
    }

    pub fn is_empty(&self, collection: Collection) -> Result<bool, StoreError> {
        Ok(self.len(collection)? == 0)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read_versioned(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<VersionedDocument, StoreError> {
        let state = self.lock()?;
        Ok(VersionedDocument {
            version: state.version(collection, id),
            body: state.document(collection, id).cloned(),
        })
    }

    fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .documents
            .get(&collection)
            .map(|documents| {
                documents
                    .values()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn allocate_id(&self, collection: Collection) -> Result<String, StoreError> {
        let mut state = self.lock()?;
        let sequence = state.sequences.entry(collection).or_insert(0);
        *sequence += 1;
        Ok(format!("{}-{:08}", collection.id_prefix(), sequence))
    }

    fn commit(&self, reads: &[ReadStamp], writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut state = self.lock()?;

        if reads
            .iter()
            .any(|stamp| state.version(stamp.collection, &stamp.id) != stamp.version)
        {
            return Err(StoreError::Conflict);
        }

        // Resolve every write against a staged view first so a failing update leaves the
        // store untouched.
        let mut staged: Vec<(DocumentKey, Option<Value>)> = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                WriteOp::Set {
                    collection,
                    id,
                    document,
                } => staged.push(((collection, id), Some(document))),
                WriteOp::Delete { collection, id } => staged.push(((collection, id), None)),
                WriteOp::Update {
                    collection,
                    id,
                    fields,
                } => {
                    let current = staged
                        .iter()
                        .rev()
                        .find(|(key, _)| key.0 == collection && key.1 == id)
                        .map(|(_, value)| value.clone())
                        .unwrap_or_else(|| state.document(collection, &id).cloned());

                    let Some(Value::Object(mut object)) = current else {
                        return Err(StoreError::NotFound { collection, id });
                    };
                    object.extend(fields);
                    staged.push(((collection, id), Some(Value::Object(object))));
                }
            }
        }

        for ((collection, id), value) in staged {
            *state.versions.entry((collection, id.clone())).or_insert(0) += 1;
            let documents = state.documents.entry(collection).or_default();
            match value {
                Some(document) => {
                    documents.insert(id, document);
                }
                None => {
                    documents.remove(&id);
                }
            }
        }

        Ok(())
    }
}
