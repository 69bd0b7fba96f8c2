use std::sync::Arc;

use thiserror::Error;

use docodm_core::{Document, DocumentId, IndexDefinition, OdmError, Reference};

use crate::context::OpContext;
use crate::filter::{Filter, FindOptions};

/// Single-pass, finite result stream.
pub type Cursor = Box<dyn Iterator<Item = Document> + Send>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-level failure.
///
/// These are infrastructure errors. The registry converts them into
/// [`OdmError`] at the boundary, so callers only ever see one error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: DocumentId },

    #[error("duplicate key in '{collection}' for index on {index}")]
    DuplicateKey { collection: String, index: String },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(String),

    #[error("cancelled during {0}")]
    Cancelled(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for OdmError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => OdmError::not_found(collection, id),
            StoreError::DeadlineExceeded(_) | StoreError::Cancelled(_) => {
                OdmError::Cancelled(err.to_string())
            }
            other => OdmError::Store(other.to_string()),
        }
    }
}

/// Document database consumed by the registry.
///
/// ## Contract
///
/// - `insert` assigns a fresh identifier and writes it into the stored
///   document's `_id`; a caller-supplied `_id` is kept.
/// - `replace` overwrites the whole document and fails with `NotFound` when
///   there is nothing to replace.
/// - `find` returns documents matching every `and` condition and, when any
///   `or` conditions exist, at least one of them. `limit == 0` is unlimited.
/// - Every call checks its [`OpContext`] before touching data and gives up
///   with `DeadlineExceeded`/`Cancelled` instead of doing the work.
///
/// No method retries and no method offers compare-and-swap: concurrent
/// replaces of one document are last-writer-wins.
pub trait DocumentStore: Send + Sync {
    fn find_one(&self, ctx: &OpContext, collection: &str, id: DocumentId)
    -> StoreResult<Option<Document>>;

    fn insert(&self, ctx: &OpContext, collection: &str, document: Document) -> StoreResult<DocumentId>;

    fn replace(
        &self,
        ctx: &OpContext,
        collection: &str,
        id: DocumentId,
        document: Document,
    ) -> StoreResult<()>;

    /// Returns whether a document was removed.
    fn delete_one(&self, ctx: &OpContext, collection: &str, id: DocumentId) -> StoreResult<bool>;

    fn find(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Cursor>;

    /// Matching documents after `skip`/`limit` are applied.
    fn count(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> StoreResult<usize>;

    /// Create an index; creating an identical one again is a no-op.
    fn ensure_index(&self, ctx: &OpContext, collection: &str, index: &IndexDefinition)
    -> StoreResult<()>;

    fn dereference(&self, ctx: &OpContext, reference: &Reference) -> StoreResult<Option<Document>> {
        self.find_one(ctx, reference.collection(), reference.id())
    }
}

impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    fn find_one(
        &self,
        ctx: &OpContext,
        collection: &str,
        id: DocumentId,
    ) -> StoreResult<Option<Document>> {
        (**self).find_one(ctx, collection, id)
    }

    fn insert(&self, ctx: &OpContext, collection: &str, document: Document) -> StoreResult<DocumentId> {
        (**self).insert(ctx, collection, document)
    }

    fn replace(
        &self,
        ctx: &OpContext,
        collection: &str,
        id: DocumentId,
        document: Document,
    ) -> StoreResult<()> {
        (**self).replace(ctx, collection, id, document)
    }

    fn delete_one(&self, ctx: &OpContext, collection: &str, id: DocumentId) -> StoreResult<bool> {
        (**self).delete_one(ctx, collection, id)
    }

    fn find(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Cursor> {
        (**self).find(ctx, collection, filter, options)
    }

    fn count(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> StoreResult<usize> {
        (**self).count(ctx, collection, filter, skip, limit)
    }

    fn ensure_index(
        &self,
        ctx: &OpContext,
        collection: &str,
        index: &IndexDefinition,
    ) -> StoreResult<()> {
        (**self).ensure_index(ctx, collection, index)
    }

    fn dereference(&self, ctx: &OpContext, reference: &Reference) -> StoreResult<Option<Document>> {
        (**self).dereference(ctx, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_maps_to_odm_cancelled() {
        let err: OdmError = StoreError::DeadlineExceeded("find".into()).into();
        assert!(matches!(err, OdmError::Cancelled(_)));
        let err: OdmError = StoreError::Cancelled("find".into()).into();
        assert!(matches!(err, OdmError::Cancelled(_)));
    }

    #[test]
    fn not_found_maps_to_entity_not_found() {
        let id = DocumentId::new();
        let err: OdmError = StoreError::NotFound {
            collection: "persons".into(),
            id,
        }
        .into();
        assert!(err.is_not_found());
    }

    #[test]
    fn other_failures_map_to_store() {
        let err: OdmError = StoreError::Backend("disk".into()).into();
        assert_eq!(err, OdmError::Store("backend failure: disk".into()));
    }
}
