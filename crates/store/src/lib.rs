//! Document store boundary.
//!
//! The ODM consumes storage through the [`DocumentStore`] trait only. This
//! crate defines that trait, the native filter format it accepts, the
//! per-call [`OpContext`] carrying deadlines and cancellation, and an
//! in-memory implementation for tests and development.

pub mod context;
pub mod document_store;
pub mod filter;

pub use context::{CancelToken, OpContext};
pub use document_store::{
    Cursor, DocumentStore, InMemoryDocumentStore, MeteredStore, StoreError, StoreMetrics,
    StoreResult,
};
pub use filter::{Condition, Filter, FindOptions, Operator};
