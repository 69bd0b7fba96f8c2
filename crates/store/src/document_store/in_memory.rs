use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::debug;

use docodm_core::entity::ID_FIELD;
use docodm_core::{Document, DocumentId, IndexDefinition, Value};

use super::r#trait::{Cursor, DocumentStore, StoreError, StoreResult};
use crate::context::OpContext;
use crate::filter::{Filter, FindOptions, lookup};

/// How often long scans re-check the context.
const CHECK_EVERY: usize = 1024;

#[derive(Debug, Default)]
struct Collection {
    next_seq: u64,
    /// Insertion sequence to document; iteration order is insertion order.
    rows: BTreeMap<u64, Document>,
    by_id: HashMap<DocumentId, u64>,
    indexes: Vec<IndexDefinition>,
}

impl Collection {
    fn get(&self, id: DocumentId) -> Option<&Document> {
        self.by_id.get(&id).and_then(|seq| self.rows.get(seq))
    }

    /// Reject `document` if it collides with another document on a unique
    /// index. Documents whose indexed fields are all null are not indexed.
    fn check_unique(&self, name: &str, document: &Document, except: Option<DocumentId>) -> StoreResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index_key(index, document);
            if key.iter().all(Value::is_null) {
                continue;
            }
            let clash = self.rows.values().any(|other| {
                let other_id = other.get(ID_FIELD).and_then(Value::as_id);
                other_id != except && index_key(index, other) == key
            });
            if clash {
                return Err(StoreError::DuplicateKey {
                    collection: name.to_string(),
                    index: index.field_names().collect::<Vec<_>>().join(", "),
                });
            }
        }
        Ok(())
    }
}

fn index_key(index: &IndexDefinition, document: &Document) -> Vec<Value> {
    index
        .field_names()
        .map(|f| lookup(document, f).cloned().unwrap_or(Value::Null))
        .collect()
}

fn project(document: &Document, fields: &[String]) -> Document {
    document
        .iter()
        .filter(|(k, _)| k.as_str() == ID_FIELD || fields.iter().any(|f| f == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// In-memory document store.
///
/// Intended for tests/dev. Scans are linear; indexes only enforce uniqueness.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> StoreResult<usize> {
        let collections = self.read()?;
        Ok(collections.get(collection).map(|c| c.rows.len()).unwrap_or(0))
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn matching(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        operation: &str,
    ) -> StoreResult<Vec<Document>> {
        let compiled = filter.compile()?;
        let collections = self.read()?;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (scanned, document) in coll.rows.values().enumerate() {
            if scanned % CHECK_EVERY == CHECK_EVERY - 1 {
                ctx.check(operation)?;
            }
            if compiled.matches(document) {
                out.push(document.clone());
            }
        }
        Ok(out)
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn find_one(
        &self,
        ctx: &OpContext,
        collection: &str,
        id: DocumentId,
    ) -> StoreResult<Option<Document>> {
        ctx.check("find_one")?;
        let collections = self.read()?;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    fn insert(&self, ctx: &OpContext, collection: &str, mut document: Document) -> StoreResult<DocumentId> {
        ctx.check("insert")?;
        let id = match document.get(ID_FIELD) {
            Some(Value::Id(id)) => *id,
            None | Some(Value::Null) => DocumentId::new(),
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "'{ID_FIELD}' must be an identifier, got {}",
                    other.type_name()
                )));
            }
        };
        document.insert(ID_FIELD.to_string(), Value::Id(id));

        let mut collections = self.write()?;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.by_id.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                index: ID_FIELD.to_string(),
            });
        }
        coll.check_unique(collection, &document, None)?;

        let seq = coll.next_seq;
        coll.next_seq += 1;
        coll.rows.insert(seq, document);
        coll.by_id.insert(id, seq);
        debug!(collection, %id, "document inserted");
        Ok(id)
    }

    fn replace(
        &self,
        ctx: &OpContext,
        collection: &str,
        id: DocumentId,
        mut document: Document,
    ) -> StoreResult<()> {
        ctx.check("replace")?;
        document.insert(ID_FIELD.to_string(), Value::Id(id));

        let mut collections = self.write()?;
        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id,
        };
        let coll = collections.get_mut(collection).ok_or_else(not_found)?;
        let seq = *coll.by_id.get(&id).ok_or_else(not_found)?;
        coll.check_unique(collection, &document, Some(id))?;
        coll.rows.insert(seq, document);
        debug!(collection, %id, "document replaced");
        Ok(())
    }

    fn delete_one(&self, ctx: &OpContext, collection: &str, id: DocumentId) -> StoreResult<bool> {
        ctx.check("delete_one")?;
        let mut collections = self.write()?;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match coll.by_id.remove(&id) {
            Some(seq) => {
                coll.rows.remove(&seq);
                debug!(collection, %id, "document deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Cursor> {
        ctx.check("find")?;
        let mut documents = self.matching(ctx, collection, filter, "find")?;

        if !options.sort.is_empty() {
            documents.sort_by(|a, b| {
                options
                    .sort
                    .iter()
                    .map(|(field, direction)| {
                        let left = lookup(a, field).unwrap_or(&Value::Null);
                        let right = lookup(b, field).unwrap_or(&Value::Null);
                        let ord = left.sort_cmp(right);
                        match direction {
                            docodm_core::SortDirection::Ascending => ord,
                            docodm_core::SortDirection::Descending => ord.reverse(),
                        }
                    })
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let limit = if options.limit == 0 { usize::MAX } else { options.limit };
        let page: Vec<Document> = documents
            .into_iter()
            .skip(options.skip)
            .take(limit)
            .map(|d| match &options.projection {
                Some(fields) => project(&d, fields),
                None => d,
            })
            .collect();
        debug!(collection, returned = page.len(), "find executed");
        Ok(Box::new(page.into_iter()))
    }

    fn count(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> StoreResult<usize> {
        ctx.check("count")?;
        let total = self.matching(ctx, collection, filter, "count")?.len();
        let after_skip = total.saturating_sub(skip);
        Ok(if limit == 0 { after_skip } else { after_skip.min(limit) })
    }

    fn ensure_index(
        &self,
        ctx: &OpContext,
        collection: &str,
        index: &IndexDefinition,
    ) -> StoreResult<()> {
        ctx.check("ensure_index")?;
        let mut collections = self.write()?;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.indexes.contains(index) {
            return Ok(());
        }
        if index.unique {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            for document in coll.rows.values() {
                let key = index_key(index, document);
                if key.iter().all(Value::is_null) {
                    continue;
                }
                if seen.contains(&key) {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        index: index.field_names().collect::<Vec<_>>().join(", "),
                    });
                }
                seen.push(key);
            }
        }
        coll.indexes.push(index.clone());
        debug!(collection, unique = index.unique, "index ensured");
        Ok(())
    }
}
