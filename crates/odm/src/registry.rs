//! Model registration, the identity cache, and every operation that touches
//! the store.
//!
//! ## Identity
//!
//! While an entity is cached, every `dispense` of its `(model, id)` returns a
//! handle to the same in-memory entity, without a store read. Loaded
//! entities are cached on load. A new entity gets its identifier from the
//! registry and is cached under it just before its first insert, and stays
//! cached unless that insert fails; `delete` evicts.
//!
//! ## Locking
//!
//! The cache has its own mutex and each entity has one. The cache lock is
//! never held across store IO, and when both are needed the entity lock is
//! taken first.
//!
//! ## Writes
//!
//! Saves are not compare-and-swap: two processes saving the same document
//! race and the last replace wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use docodm_core::entity::{ID_FIELD, MODEL_FIELD};
use docodm_core::{
    DocumentId, Entity, FieldKind, Model, OdmError, OdmResult, Reference, Value,
};
use docodm_store::{CancelToken, DocumentStore, OpContext};

use crate::config::OdmConfig;
use crate::finder::Finder;
use crate::handle::EntityHandle;

type CacheKey = (String, DocumentId);

#[derive(Clone)]
struct ModelEntry {
    model: Arc<dyn Model>,
    collection: String,
}

/// A field value with references followed.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Any non-reference field.
    Value(Value),
    /// A reference field. `target` is `None` when unset or when the target
    /// is gone; `healed` reports that this read cleared a dangling reference.
    Entity {
        target: Option<EntityHandle>,
        healed: bool,
    },
    /// A reference list, minus targets that no longer exist.
    Entities(Vec<EntityHandle>),
}

impl Resolved {
    pub fn into_entity(self) -> Option<EntityHandle> {
        match self {
            Resolved::Entity { target, .. } => target,
            _ => None,
        }
    }

    pub fn into_entities(self) -> Vec<EntityHandle> {
        match self {
            Resolved::Entities(handles) => handles,
            Resolved::Entity { target, .. } => target.into_iter().collect(),
            Resolved::Value(_) => Vec::new(),
        }
    }
}

pub struct Registry<S> {
    store: S,
    config: OdmConfig,
    models: RwLock<HashMap<String, ModelEntry>>,
    cache: Mutex<HashMap<CacheKey, EntityHandle>>,
    cancel: CancelToken,
}

impl<S> core::fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: DocumentStore> Registry<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, OdmConfig::default())
    }

    pub fn with_config(store: S, config: OdmConfig) -> Self {
        Self {
            store,
            config,
            models: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &OdmConfig {
        &self.config
    }

    /// Cancel every in-flight and future store call made by this registry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Context for one store call: the configured timeout plus the registry's
    /// cancellation token.
    pub fn context(&self) -> OpContext {
        let ctx = OpContext::background().with_cancel(self.cancel.clone());
        match self.config.store_timeout {
            Some(timeout) => ctx.deadline_in(timeout),
            None => ctx,
        }
    }

    /// Register `model` under `name`.
    ///
    /// Declared indexes are checked against the model's fields and created in
    /// the store. Replacing a model evicts its cached entities.
    #[instrument(skip(self, model), fields(model = %name))]
    pub fn register_model(&self, name: &str, model: Arc<dyn Model>, allow_replace: bool) -> OdmResult<()> {
        let replacing = self.is_registered(name)?;
        if replacing && !allow_replace {
            return Err(OdmError::ModelAlreadyRegistered(name.to_string()));
        }

        let collection = model
            .collection_name()
            .unwrap_or_else(|| self.config.collection_for(name));
        let probe = Entity::create(name, collection.clone(), Arc::clone(&model), Utc::now())?;
        let indexes = model.indexes();
        for index in &indexes {
            for field in index.field_names() {
                let root = field.split('.').next().unwrap_or(field);
                if !probe.has_field(root) {
                    return Err(OdmError::unknown_field(name, field));
                }
            }
        }
        let ctx = self.context();
        for index in &indexes {
            self.store.ensure_index(&ctx, &collection, index)?;
        }

        self.models_write()?.insert(
            name.to_string(),
            ModelEntry {
                model,
                collection: collection.clone(),
            },
        );
        if replacing {
            let mut cache = self.cache_lock()?;
            let before = cache.len();
            cache.retain(|(model_name, _), _| model_name != name);
            debug!(evicted = before - cache.len(), "model replaced");
        }
        info!(%collection, indexes = indexes.len(), "model registered");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> OdmResult<bool> {
        Ok(self.models_read()?.contains_key(name))
    }

    pub fn collection_of(&self, name: &str) -> OdmResult<String> {
        Ok(self.entry(name)?.collection)
    }

    /// Names of every registered model, sorted.
    pub fn registered_models(&self) -> OdmResult<Vec<String>> {
        let mut names: Vec<String> = self.models_read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Forget a model and evict its cached entities. Stored documents are
    /// untouched.
    #[instrument(skip(self), fields(model = %name))]
    pub fn unregister_model(&self, name: &str) -> OdmResult<()> {
        if self.models_write()?.remove(name).is_none() {
            return Err(OdmError::ModelNotRegistered(name.to_string()));
        }
        let mut cache = self.cache_lock()?;
        let before = cache.len();
        cache.retain(|(model_name, _), _| model_name != name);
        info!(evicted = before - cache.len(), "model unregistered");
        Ok(())
    }

    /// A fresh, unsaved entity. Not cached until its first save.
    pub fn create(&self, model_name: &str) -> OdmResult<EntityHandle> {
        Ok(EntityHandle::new(self.new_entity(model_name)?))
    }

    /// Existing entity by id (or a new one when `id` is `None`).
    ///
    /// Returns `Ok(None)` when the document does not exist; an unregistered
    /// model is an error.
    #[instrument(skip(self), level = "debug")]
    pub fn dispense(&self, model_name: &str, id: Option<DocumentId>) -> OdmResult<Option<EntityHandle>> {
        let Some(id) = id else {
            return self.create(model_name).map(Some);
        };
        let entry = self.entry(model_name)?;
        let key = (model_name.to_string(), id);

        if let Some(handle) = self.cache_lock()?.get(&key) {
            debug!("identity cache hit");
            return Ok(Some(handle.clone()));
        }

        let Some(document) = self.store.find_one(&self.context(), &entry.collection, id)? else {
            debug!("document not found");
            return Ok(None);
        };
        let entity = Entity::from_document(model_name, entry.collection, entry.model, document)?;

        // Another caller may have loaded the same entity meanwhile; the first
        // insert wins so both end up with one handle.
        let handle = self
            .cache_lock()?
            .entry(key)
            .or_insert_with(|| EntityHandle::new(entity))
            .clone();
        Ok(Some(handle))
    }

    /// Follow a reference through the identity cache.
    ///
    /// The stored document names its model, so the reference alone is
    /// enough. `None` means the target no longer exists.
    pub fn dereference(&self, reference: &Reference) -> OdmResult<Option<EntityHandle>> {
        let Some(document) = self.store.dereference(&self.context(), reference)? else {
            return Ok(None);
        };
        let model_name = document
            .get(MODEL_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OdmError::InvalidReference(format!("document behind {reference} names no model"))
            })?
            .to_string();
        self.dispense(&model_name, Some(reference.id()))
    }

    /// Like [`Registry::dereference`], but a missing target is an error.
    pub fn get_by_ref(&self, reference: &Reference) -> OdmResult<EntityHandle> {
        self.dereference(reference)?
            .ok_or_else(|| OdmError::not_found(reference.collection(), reference.id()))
    }

    /// Cached entity behind `reference`, without touching the store.
    fn cached_by_reference(&self, reference: &Reference) -> OdmResult<Option<EntityHandle>> {
        let candidate = self
            .cache_lock()?
            .iter()
            .find(|((_, id), _)| *id == reference.id())
            .map(|(_, handle)| handle.clone());
        let Some(handle) = candidate else {
            return Ok(None);
        };
        let same_collection = handle.read(|e| e.collection() == reference.collection())?;
        Ok(same_collection.then_some(handle))
    }

    pub fn is_cached(&self, model_name: &str, id: DocumentId) -> OdmResult<bool> {
        Ok(self.cache_lock()?.contains_key(&(model_name.to_string(), id)))
    }

    pub fn cached_len(&self) -> OdmResult<usize> {
        Ok(self.cache_lock()?.len())
    }

    /// Forget every cached entity, e.g. at the end of a unit of work.
    /// Outstanding handles stay usable but are no longer shared with new
    /// dispenses.
    pub fn clear_cache(&self) -> OdmResult<()> {
        self.cache_lock()?.clear();
        Ok(())
    }

    /// Drop an entity from the identity cache. Returns whether it was cached.
    pub fn evict(&self, handle: &EntityHandle) -> OdmResult<bool> {
        let (model_name, id) = handle.read(|e| (e.model_name().to_string(), e.id()))?;
        match id {
            Some(id) => self.evict_key(&model_name, id),
            None => Ok(false),
        }
    }

    /// Persist pending changes. A clean entity is left alone without any
    /// store call.
    ///
    /// On failure every field keeps its modified flag, so the save can be
    /// retried. After a successful save, cached children with pending
    /// changes are saved too.
    #[instrument(skip(self, handle), level = "debug")]
    pub fn save(&self, handle: &EntityHandle) -> OdmResult<()> {
        let children = {
            let mut entity = handle.lock()?;
            if !self.save_locked(handle, &mut entity)? {
                return Ok(());
            }
            entity.children()
        };

        for reference in &children {
            let Some(child) = self.cached_by_reference(reference)? else {
                continue;
            };
            if !child.same_entity(handle) && child.is_modified()? {
                self.save(&child)?;
            }
        }
        Ok(())
    }

    /// Returns whether anything was written.
    fn save_locked(&self, handle: &EntityHandle, entity: &mut Entity) -> OdmResult<bool> {
        let Some(mut document) = entity.prepare_save(Utc::now())? else {
            debug!(model = entity.model_name(), "entity is clean; nothing to save");
            return Ok(false);
        };

        let ctx = self.context();
        let collection = entity.collection().to_string();
        if !entity.is_new() {
            let id = entity
                .id()
                .ok_or_else(|| OdmError::InvalidId("persisted entity without identifier".into()))?;
            self.store.replace(&ctx, &collection, id, document)?;
            entity.complete_save(None)?;
            debug!(model = entity.model_name(), %id, "entity replaced");
            return Ok(true);
        }

        // The identifier is chosen here and the key reserved before the
        // insert, so a dispense racing the insert finds this handle.
        let model_name = entity.model_name().to_string();
        let id = DocumentId::new();
        document.insert(ID_FIELD.to_string(), Value::Id(id));
        self.cache_lock()?.insert((model_name.clone(), id), handle.clone());

        let stored = match self.store.insert(&ctx, &collection, document) {
            Ok(stored) => stored,
            Err(err) => {
                self.release_reservation(&model_name, id, handle)?;
                return Err(err.into());
            }
        };
        if stored != id {
            warn!(model = %model_name, requested = %id, %stored, "store replaced the identifier");
            let mut cache = self.cache_lock()?;
            cache.remove(&(model_name.clone(), id));
            cache.insert((model_name.clone(), stored), handle.clone());
        }
        debug!(model = %model_name, id = %stored, "entity inserted");

        // Cached already: a failing after-save hook still leaves one copy.
        entity.complete_save(Some(stored))?;
        Ok(true)
    }

    fn release_reservation(&self, model_name: &str, id: DocumentId, handle: &EntityHandle) -> OdmResult<()> {
        let key = (model_name.to_string(), id);
        let mut cache = self.cache_lock()?;
        if cache.get(&key).is_some_and(|cached| cached.same_entity(handle)) {
            cache.remove(&key);
        }
        Ok(())
    }

    /// Delete the entity and its document, and evict it.
    ///
    /// Children of a persisted entity lose their parent pointer and are
    /// saved.
    #[instrument(skip(self, handle), level = "debug")]
    pub fn delete(&self, handle: &EntityHandle) -> OdmResult<()> {
        let orphans = {
            let mut entity = handle.lock()?;
            entity.prepare_delete()?;

            let mut orphans = None;
            if let (false, Some(id)) = (entity.is_new(), entity.id()) {
                let removed = self.store.delete_one(&self.context(), entity.collection(), id)?;
                if !removed {
                    warn!(model = entity.model_name(), %id, "document was already gone");
                }
                self.evict_key(entity.model_name(), id)?;
                info!(model = entity.model_name(), %id, "entity deleted");
                orphans = Some((entity.reference()?, entity.children()));
            }
            entity.complete_delete()?;
            orphans
        };

        if let Some((parent, children)) = orphans {
            for reference in &children {
                self.orphan(&parent, reference)?;
            }
        }
        Ok(())
    }

    fn orphan(&self, parent: &Reference, reference: &Reference) -> OdmResult<()> {
        let Some(child) = self.dereference(reference)? else {
            return Ok(());
        };
        let orphaned = child.write(|c| {
            if c.is_deleted() || c.parent().as_ref() != Some(parent) {
                return Ok(false);
            }
            c.clear_parent()?;
            Ok(true)
        })?;
        if orphaned {
            self.save(&child)?;
            debug!(child = %reference, "parent pointer cleared");
        }
        Ok(())
    }

    /// Discard unsaved changes by reloading the stored document into the
    /// same entity. A new entity has nothing stored and is left alone.
    #[instrument(skip(self, handle), level = "debug")]
    pub fn reload(&self, handle: &EntityHandle) -> OdmResult<()> {
        let mut entity = handle.lock()?;
        if entity.is_deleted() {
            return Err(OdmError::EntityDeleted(entity.model_name().to_string()));
        }
        if entity.is_new() {
            return Ok(());
        }
        let reference = entity.reference()?;
        let document = self
            .store
            .find_one(&self.context(), reference.collection(), reference.id())?
            .ok_or_else(|| OdmError::not_found(entity.model_name(), reference.id()))?;
        let model_name = entity.model_name().to_string();
        let entry = self.entry(&model_name)?;
        *entity = Entity::from_document(&model_name, entry.collection, entry.model, document)?;
        Ok(())
    }

    /// Read a field, following references.
    ///
    /// A reference whose target has disappeared is cleared in place and the
    /// entity is left modified, so the next save persists the repair.
    /// Reference lists silently skip missing targets and are not rewritten.
    pub fn resolve_field(&self, handle: &EntityHandle, name: &str) -> OdmResult<Resolved> {
        let (kind, value) = handle.read(|e| -> OdmResult<_> {
            Ok((e.field(name)?.kind().clone(), e.get_field(name)?))
        })??;

        match (kind, value) {
            (FieldKind::Reference { .. }, Value::Reference(reference)) => {
                if let Some(target) = self.dereference(&reference)? {
                    return Ok(Resolved::Entity {
                        target: Some(target),
                        healed: false,
                    });
                }
                let mut entity = handle.lock()?;
                let unchanged = entity.field(name)?.value().as_reference() == Some(&reference);
                let healed = unchanged && !entity.is_deleted();
                if healed {
                    entity.heal_reference(name)?;
                    warn!(
                        model = entity.model_name(),
                        field = name,
                        target = %reference,
                        "dangling reference cleared"
                    );
                }
                Ok(Resolved::Entity { target: None, healed })
            }
            (FieldKind::Reference { .. }, _) => Ok(Resolved::Entity {
                target: None,
                healed: false,
            }),
            (FieldKind::ReferenceList { .. }, Value::ReferenceList(references)) => {
                let mut targets = Vec::with_capacity(references.len());
                for reference in &references {
                    match self.dereference(reference)? {
                        Some(target) => targets.push(target),
                        None => debug!(field = name, target = %reference, "skipping missing reference"),
                    }
                }
                Ok(Resolved::Entities(targets))
            }
            (FieldKind::ReferenceList { .. }, _) => Ok(Resolved::Entities(Vec::new())),
            (_, value) => Ok(Resolved::Value(value)),
        }
    }

    /// Query builder for a registered model.
    pub fn find(&self, model_name: &str) -> OdmResult<Finder<'_, S>> {
        Finder::new(self, model_name)
    }

    pub(crate) fn new_entity(&self, model_name: &str) -> OdmResult<Entity> {
        let entry = self.entry(model_name)?;
        Entity::create(model_name, entry.collection, entry.model, Utc::now())
    }

    fn evict_key(&self, model_name: &str, id: DocumentId) -> OdmResult<bool> {
        let removed = self
            .cache_lock()?
            .remove(&(model_name.to_string(), id))
            .is_some();
        if removed {
            debug!(model = model_name, %id, "evicted");
        }
        Ok(removed)
    }

    fn entry(&self, name: &str) -> OdmResult<ModelEntry> {
        self.models_read()?
            .get(name)
            .cloned()
            .ok_or_else(|| OdmError::ModelNotRegistered(name.to_string()))
    }

    fn models_read(&self) -> OdmResult<std::sync::RwLockReadGuard<'_, HashMap<String, ModelEntry>>> {
        self.models.read().map_err(|_| OdmError::poisoned("model registry"))
    }

    fn models_write(&self) -> OdmResult<std::sync::RwLockWriteGuard<'_, HashMap<String, ModelEntry>>> {
        self.models.write().map_err(|_| OdmError::poisoned("model registry"))
    }

    fn cache_lock(&self) -> OdmResult<MutexGuard<'_, HashMap<CacheKey, EntityHandle>>> {
        self.cache.lock().map_err(|_| OdmError::poisoned("identity cache"))
    }
}
