//! `docodm-core`: the pure half of the document mapper.
//!
//! Values, fields, entities, and the model hook trait live here. Nothing in
//! this crate performs IO; the store and the registry sit on top of it.

pub mod entity;
pub mod error;
pub mod field;
pub mod id;
pub mod model;
pub mod reference;
pub mod schema;
pub mod value;

pub use entity::{Entity, EntityState};
pub use error::{OdmError, OdmResult};
pub use field::{Field, FieldKind, FieldOptions, FieldSet, ReleaseHook};
pub use id::DocumentId;
pub use model::{Model, PlainModel};
pub use reference::Reference;
pub use schema::{IndexDefinition, SortDirection};
pub use value::{Document, Value};
