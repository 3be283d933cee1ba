use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use super::{Collection, Document, DocumentStore, ReadStamp, StoreError, WriteOp};

type DocumentKey = (Collection, String);

/// Read-validate-write unit of work. Reads are recorded with their versions, writes are
/// buffered and become visible to later reads inside the same transaction.
pub struct Transaction<'a> {
    store: &'a dyn DocumentStore,
    read_versions: HashMap<DocumentKey, u64>,
    view: HashMap<DocumentKey, Option<Value>>,
    writes: Vec<WriteOp>,
}

impl<'a> Transaction<'a> {
    fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            read_versions: HashMap::new(),
            view: HashMap::new(),
            writes: Vec::new(),
        }
    }

    pub fn get_value(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let key = (collection, id.to_string());
        if let Some(current) = self.view.get(&key) {
            return Ok(current.clone());
        }

        let read = self.store.read_versioned(collection, id)?;
        self.read_versions.insert(key.clone(), read.version);
        self.view.insert(key, read.body.clone());
        Ok(read.body)
    }

    pub fn get<D: Document>(&mut self, id: &str) -> Result<Option<D>, StoreError> {
        self.get_value(D::COLLECTION, id)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn set<D: Document>(&mut self, document: &D) -> Result<(), StoreError> {
        let value = serde_json::to_value(document)?;
        self.set_value(D::COLLECTION, document.document_id(), value);
        Ok(())
    }

    pub fn set_value(&mut self, collection: Collection, id: &str, document: Value) {
        self.view
            .insert((collection, id.to_string()), Some(document.clone()));
        self.writes.push(WriteOp::Set {
            collection,
            id: id.to_string(),
            document,
        });
    }

    /// Merges fields into an existing document; the document joins the read set.
    pub fn update(
        &mut self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let Some(Value::Object(mut object)) = self.get_value(collection, id)? else {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        };
        object.extend(fields.clone());
        self.view
            .insert((collection, id.to_string()), Some(Value::Object(object)));
        self.writes.push(WriteOp::Update {
            collection,
            id: id.to_string(),
            fields,
        });
        Ok(())
    }

    pub fn delete<D: Document>(&mut self, id: &str) {
        self.delete_value(D::COLLECTION, id);
    }

    pub fn delete_value(&mut self, collection: Collection, id: &str) {
        self.view.insert((collection, id.to_string()), None);
        self.writes.push(WriteOp::Delete {
            collection,
            id: id.to_string(),
        });
    }

    pub fn allocate_id(&self, collection: Collection) -> Result<String, StoreError> {
        self.store.allocate_id(collection)
    }

    fn commit(self) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            return Ok(());
        }

        let reads: Vec<ReadStamp> = self
            .read_versions
            .into_iter()
            .map(|((collection, id), version)| ReadStamp {
                collection,
                id,
                version,
            })
            .collect();
        self.store.commit(&reads, self.writes)
    }
}

/// Runs `body` inside an optimistic transaction, re-running it from scratch whenever the
/// commit detects that something it read has changed. After `attempts` conflicting
/// commits the conflict is returned to the caller.
///
/// `body` may run several times, so it must only mutate state through the transaction.
pub fn run_transaction<T, E, F>(
    store: &dyn DocumentStore,
    attempts: u32,
    mut body: F,
) -> Result<T, E>
where
    F: FnMut(&mut Transaction<'_>) -> Result<T, E>,
    E: From<StoreError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        let mut transaction = Transaction::new(store);
        let value = body(&mut transaction)?;

        match transaction.commit() {
            Ok(()) => return Ok(value),
            Err(StoreError::Conflict) if attempt < attempts => {
                debug!(attempt, "transaction conflict, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
