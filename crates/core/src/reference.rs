//! Cross-document pointers.

use serde::{Deserialize, Serialize};

use crate::id::DocumentId;

/// Value-type pointer to another document: `(collection, id)`.
///
/// A reference never owns the entity it points at, so entities that refer to
/// each other cannot keep one another alive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    collection: String,
    id: DocumentId,
}

impl Reference {
    pub fn new(collection: impl Into<String>, id: DocumentId) -> Self {
        Self {
            collection: collection.into(),
            id,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }
}

impl core::fmt::Display for Reference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.collection, self.id)
    }
}
