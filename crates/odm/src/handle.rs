//! Shared handles to cached entities.

use std::sync::{Arc, Mutex, MutexGuard};

use docodm_core::entity::{CHILDREN_FIELD, PARENT_FIELD};
use docodm_core::{DocumentId, Entity, OdmError, OdmResult, Reference, Value};

/// Reference-counted, lock-protected entity.
///
/// Every handle obtained from the registry for the same `(model, id)` points
/// at the same entity, so a mutation through one handle is visible through
/// all of them. Each access takes the entity's own lock.
#[derive(Debug, Clone)]
pub struct EntityHandle(Arc<Mutex<Entity>>);

impl EntityHandle {
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(Mutex::new(entity)))
    }

    pub fn lock(&self) -> OdmResult<MutexGuard<'_, Entity>> {
        self.0.lock().map_err(|_| OdmError::poisoned("entity"))
    }

    pub fn read<R>(&self, f: impl FnOnce(&Entity) -> R) -> OdmResult<R> {
        Ok(f(&*self.lock()?))
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Entity) -> OdmResult<R>) -> OdmResult<R> {
        f(&mut *self.lock()?)
    }

    /// True when both handles share one entity.
    pub fn same_entity(&self, other: &EntityHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn model_name(&self) -> OdmResult<String> {
        self.read(|e| e.model_name().to_string())
    }

    pub fn id(&self) -> OdmResult<Option<DocumentId>> {
        self.read(Entity::id)
    }

    pub fn reference(&self) -> OdmResult<Reference> {
        self.lock()?.reference()
    }

    pub fn is_modified(&self) -> OdmResult<bool> {
        self.read(Entity::is_modified)
    }

    pub fn get_field(&self, name: &str) -> OdmResult<Value> {
        self.lock()?.get_field(name)
    }

    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> OdmResult<()> {
        self.lock()?.set_field(name, value)?;
        Ok(())
    }

    /// Point a reference field of this entity at another live entity.
    ///
    /// The target's lock is released before this entity's is taken, so two
    /// handles pointing at each other cannot deadlock.
    pub fn set_field_entity(&self, name: &str, target: &EntityHandle) -> OdmResult<()> {
        let (model, reference) = target.read(|t| (t.model_name().to_string(), t.reference()))?;
        self.lock()?.set_field_reference(name, &model, reference?)?;
        Ok(())
    }

    /// Make `child` a child of this entity: this entity lists it under
    /// `_children` and the child points back through `_parent`. Both must
    /// have been saved. Locks are taken one at a time.
    pub fn add_child(&self, child: &EntityHandle) -> OdmResult<()> {
        if self.same_entity(child) {
            return Err(OdmError::InvalidReference("an entity cannot be its own child".into()));
        }
        let child_ref = child.reference()?;
        let (parent_model, parent_ref) = self.read(|p| (p.model_name().to_string(), p.reference()))?;
        let parent_ref = parent_ref?;

        self.lock()?.add_to_field(CHILDREN_FIELD, child_ref)?;
        child.lock()?.set_field_reference(PARENT_FIELD, &parent_model, parent_ref)?;
        Ok(())
    }

    /// Undo [`EntityHandle::add_child`]: drop the child from `_children` and
    /// clear its `_parent`.
    pub fn remove_child(&self, child: &EntityHandle) -> OdmResult<()> {
        let child_ref = child.reference()?;
        self.lock()?.remove_child(&child_ref)?;
        child.lock()?.clear_parent()?;
        Ok(())
    }

    pub fn parent(&self) -> OdmResult<Option<Reference>> {
        self.read(Entity::parent)
    }

    pub fn children(&self) -> OdmResult<Vec<Reference>> {
        self.read(Entity::children)
    }

    pub fn add_to_field(&self, name: &str, value: impl Into<Value>) -> OdmResult<()> {
        self.lock()?.add_to_field(name, value)?;
        Ok(())
    }

    pub fn remove_from_field(&self, name: &str, value: impl Into<Value>) -> OdmResult<()> {
        self.lock()?.remove_from_field(name, value)?;
        Ok(())
    }
}
