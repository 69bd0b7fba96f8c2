//! Document store boundary and its implementations.

pub mod in_memory;
pub mod metered;
pub mod r#trait;

pub use in_memory::InMemoryDocumentStore;
pub use metered::{MeteredStore, StoreMetrics};
pub use r#trait::{Cursor, DocumentStore, StoreError, StoreResult};
