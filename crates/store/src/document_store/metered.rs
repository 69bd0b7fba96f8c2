use std::sync::atomic::{AtomicU64, Ordering};

use docodm_core::{Document, DocumentId, IndexDefinition, Reference};

use super::r#trait::{Cursor, DocumentStore, StoreResult};
use crate::context::OpContext;
use crate::filter::{Filter, FindOptions};

/// Point-in-time copy of a [`MeteredStore`]'s counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub reads: u64,
    pub writes: u64,
    pub queries: u64,
}

impl StoreMetrics {
    pub fn total(&self) -> u64 {
        self.reads + self.writes + self.queries
    }
}

/// Adapter counting the calls that reach the wrapped store.
///
/// Reads are `find_one`/`dereference`, writes are `insert`/`replace`/
/// `delete_one`/`ensure_index`, queries are `find`/`count`. A call is counted
/// whether or not it succeeds.
#[derive(Debug, Default)]
pub struct MeteredStore<S> {
    inner: S,
    reads: AtomicU64,
    writes: AtomicU64,
    queries: AtomicU64,
}

impl<S> MeteredStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            queries: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.queries.store(0, Ordering::Relaxed);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<S: DocumentStore> DocumentStore for MeteredStore<S> {
    fn find_one(
        &self,
        ctx: &OpContext,
        collection: &str,
        id: DocumentId,
    ) -> StoreResult<Option<Document>> {
        Self::bump(&self.reads);
        self.inner.find_one(ctx, collection, id)
    }

    fn insert(&self, ctx: &OpContext, collection: &str, document: Document) -> StoreResult<DocumentId> {
        Self::bump(&self.writes);
        self.inner.insert(ctx, collection, document)
    }

    fn replace(
        &self,
        ctx: &OpContext,
        collection: &str,
        id: DocumentId,
        document: Document,
    ) -> StoreResult<()> {
        Self::bump(&self.writes);
        self.inner.replace(ctx, collection, id, document)
    }

    fn delete_one(&self, ctx: &OpContext, collection: &str, id: DocumentId) -> StoreResult<bool> {
        Self::bump(&self.writes);
        self.inner.delete_one(ctx, collection, id)
    }

    fn find(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Cursor> {
        Self::bump(&self.queries);
        self.inner.find(ctx, collection, filter, options)
    }

    fn count(
        &self,
        ctx: &OpContext,
        collection: &str,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> StoreResult<usize> {
        Self::bump(&self.queries);
        self.inner.count(ctx, collection, filter, skip, limit)
    }

    fn ensure_index(
        &self,
        ctx: &OpContext,
        collection: &str,
        index: &IndexDefinition,
    ) -> StoreResult<()> {
        Self::bump(&self.writes);
        self.inner.ensure_index(ctx, collection, index)
    }

    fn dereference(&self, ctx: &OpContext, reference: &Reference) -> StoreResult<Option<Document>> {
        Self::bump(&self.reads);
        self.inner.dereference(ctx, reference)
    }
}
