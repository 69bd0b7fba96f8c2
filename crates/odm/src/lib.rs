//! `docodm`: object-document mapper with an identity cache.
//!
//! ```text
//! Registry ── dispense/save/delete ──> DocumentStore
//!    │  identity cache: (model, id) -> EntityHandle
//!    └─ find(model) -> Finder -> ResultSequence (dispensed handles)
//! ```
//!
//! Models are registered once with a [`Model`] implementation. Entities are
//! obtained from the registry, mutated through their handles, and persisted
//! with [`Registry::save`]. Saving a clean entity performs no store IO.

pub mod config;
pub mod finder;
pub mod handle;
pub mod query;
pub mod registry;


pub use config::OdmConfig;
pub use finder::{Finder, ResultSequence};
pub use handle::EntityHandle;
pub use query::{LogicalOperator, Query, parse_operator};
pub use registry::{Registry, Resolved};

pub use docodm_core::{
    Document, DocumentId, Entity, EntityState, Field, FieldKind, FieldSet, IndexDefinition, Model,
    OdmError, OdmResult, PlainModel, Reference, SortDirection, Value,
};
pub use docodm_store::{
    CancelToken, DocumentStore, InMemoryDocumentStore, MeteredStore, OpContext, StoreMetrics,
};
