//! Sort and index declarations shared by models, finders, and stores.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// An index a model declares once; the registry creates it in the store when
/// the model is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub fields: Vec<(String, SortDirection)>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(fields: Vec<(String, SortDirection)>) -> Self {
        Self {
            fields,
            unique: false,
        }
    }

    /// Single ascending field.
    pub fn on(field: impl Into<String>) -> Self {
        Self::new(vec![(field.into(), SortDirection::Ascending)])
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}
