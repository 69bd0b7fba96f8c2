//! Per-model behavior: schema, storage naming, and lifecycle hooks.

use crate::entity::Entity;
use crate::error::OdmResult;
use crate::field::FieldSet;
use crate::schema::IndexDefinition;
use crate::value::Value;

/// Behavior registered once per model name.
///
/// Every method has a no-op default, so a model only overrides what it needs.
/// Hooks are pure with respect to storage: they see and mutate the entity but
/// never talk to the store. The registry sequences IO around them.
pub trait Model: Send + Sync {
    /// Define model-specific fields. Runs after the base fields exist and
    /// before any stored values are populated.
    fn setup_fields(&self, _fields: &mut FieldSet) -> OdmResult<()> {
        Ok(())
    }

    /// Explicit collection name; `None` derives one from the model name.
    fn collection_name(&self) -> Option<String> {
        None
    }

    /// Indexes created in the store when the model is registered.
    fn indexes(&self) -> Vec<IndexDefinition> {
        Vec::new()
    }

    fn pre_save(&self, _entity: &mut Entity) -> OdmResult<()> {
        Ok(())
    }

    fn after_save(&self, _entity: &mut Entity) -> OdmResult<()> {
        Ok(())
    }

    fn pre_delete(&self, _entity: &mut Entity) -> OdmResult<()> {
        Ok(())
    }

    fn after_delete(&self, _entity: &mut Entity) -> OdmResult<()> {
        Ok(())
    }

    /// Rewrite (or reject) a value on its way into a field.
    fn on_set_field(&self, _entity: &Entity, _field: &str, value: Value) -> OdmResult<Value> {
        Ok(value)
    }

    /// Rewrite a value on its way out of a field.
    fn on_get_field(&self, _entity: &Entity, _field: &str, value: Value) -> OdmResult<Value> {
        Ok(value)
    }
}

/// Model with base fields only.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainModel;

impl Model for PlainModel {}
