//! Entities: an ordered set of fields plus identity and a lifecycle.
//!
//! Entities never perform IO. Saving and deleting are split into a
//! `prepare_*` half that runs hooks and validation and a `complete_*` half
//! that records the outcome, and the registry calls the store in between.
//!
//! State machine: `New -> Persisted -> Deleted`. `Deleted` is terminal.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{OdmError, OdmResult};
use crate::field::{Field, FieldKind, FieldSet};
use crate::id::DocumentId;
use crate::model::Model;
use crate::reference::Reference;
use crate::value::{Document, Value};

pub const ID_FIELD: &str = "_id";
pub const MODEL_FIELD: &str = "_model";
pub const PARENT_FIELD: &str = "_parent";
pub const CHILDREN_FIELD: &str = "_children";
pub const CREATED_FIELD: &str = "_created";
pub const MODIFIED_FIELD: &str = "_modified";

/// Fields only the ODM writes.
const PROTECTED_FIELDS: [&str; 2] = [ID_FIELD, MODEL_FIELD];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntityState {
    New,
    Persisted,
    Deleted,
}

pub struct Entity {
    model_name: String,
    collection: String,
    model: Arc<dyn Model>,
    fields: FieldSet,
    state: EntityState,
}

impl core::fmt::Debug for Entity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entity")
            .field("model_name", &self.model_name)
            .field("collection", &self.collection)
            .field("state", &self.state)
            .field("fields", &self.fields)
            .finish()
    }
}

impl Entity {
    /// Fresh, unsaved entity. Base fields are stamped and therefore modified,
    /// so the first save always writes.
    pub fn create(
        model_name: impl Into<String>,
        collection: impl Into<String>,
        model: Arc<dyn Model>,
        now: DateTime<Utc>,
    ) -> OdmResult<Self> {
        let mut entity = Self::with_schema(model_name.into(), collection.into(), model)?;
        let model_name = Value::Str(entity.model_name.clone());
        entity.base_field(MODEL_FIELD)?.set_value(model_name, true)?;
        entity.base_field(CREATED_FIELD)?.set_value(now, true)?;
        entity.base_field(MODIFIED_FIELD)?.set_value(now, true)?;
        Ok(entity)
    }

    /// Entity populated from a stored document. Nothing is marked modified.
    ///
    /// Keys the schema does not know are ignored, so documents written by an
    /// older schema still load.
    pub fn from_document(
        model_name: impl Into<String>,
        collection: impl Into<String>,
        model: Arc<dyn Model>,
        document: Document,
    ) -> OdmResult<Self> {
        let mut entity = Self::with_schema(model_name.into(), collection.into(), model)?;
        if !matches!(document.get(ID_FIELD), Some(Value::Id(_))) {
            return Err(OdmError::InvalidId(format!(
                "stored '{}' document has no identifier",
                entity.model_name
            )));
        }
        for (name, value) in document {
            if let Some(field) = entity.fields.get_mut(&name) {
                field.set_value(value, false)?;
            }
        }
        entity.state = EntityState::Persisted;
        Ok(entity)
    }

    fn with_schema(model_name: String, collection: String, model: Arc<dyn Model>) -> OdmResult<Self> {
        let mut fields = FieldSet::new(model_name.clone());
        fields
            .define(Field::id(ID_FIELD))?
            .define(Field::string(MODEL_FIELD).required())?
            .define(Field::any_reference(PARENT_FIELD))?
            .define(Field::any_reference_list(CHILDREN_FIELD))?
            .define(Field::datetime(CREATED_FIELD))?
            .define(Field::datetime(MODIFIED_FIELD))?;
        model.setup_fields(&mut fields)?;
        Ok(Self {
            model_name,
            collection,
            model,
            fields,
            state: EntityState::New,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> Option<DocumentId> {
        self.fields.get(ID_FIELD).and_then(|f| f.value().as_id())
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn is_new(&self) -> bool {
        self.state == EntityState::New
    }

    pub fn is_deleted(&self) -> bool {
        self.state == EntityState::Deleted
    }

    /// True iff any field is modified.
    pub fn is_modified(&self) -> bool {
        self.fields.iter().any(Field::is_modified)
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    pub fn field(&self, name: &str) -> OdmResult<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| OdmError::unknown_field(&self.model_name, name))
    }

    /// Pointer to this entity; fails until it has been saved.
    pub fn reference(&self) -> OdmResult<Reference> {
        match self.id() {
            Some(id) => Ok(Reference::new(self.collection.clone(), id)),
            None => Err(OdmError::InvalidReference(format!(
                "reference to '{}' requires a persisted entity",
                self.model_name
            ))),
        }
    }

    /// Raw value after the model's read hook. Reference fields return their
    /// stored references; resolving them needs the registry.
    pub fn get_field(&self, name: &str) -> OdmResult<Value> {
        let value = self.field(name)?.value().clone();
        let model = Arc::clone(&self.model);
        model.on_get_field(self, name, value)
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> OdmResult<&mut Self> {
        self.ensure_writable(name)?;
        let model = Arc::clone(&self.model);
        let value = model.on_set_field(self, name, value.into())?;
        self.field_mut(name)?.set_value(value, true)?;
        Ok(self)
    }

    /// Point a reference field at a live entity. A reference list is replaced
    /// by a single-element list.
    pub fn set_field_entity(&mut self, name: &str, target: &Entity) -> OdmResult<&mut Self> {
        let reference = target.reference()?;
        self.set_field_reference(name, target.model_name(), reference)
    }

    /// Like [`Entity::set_field_entity`] for a target known only by its model
    /// name and reference.
    pub fn set_field_reference(
        &mut self,
        name: &str,
        target_model: &str,
        reference: Reference,
    ) -> OdmResult<&mut Self> {
        self.check_target(name, target_model)?;
        let value = match self.field(name)?.kind() {
            FieldKind::ReferenceList { .. } => Value::ReferenceList(vec![reference]),
            _ => Value::Reference(reference),
        };
        self.set_field(name, value)
    }

    /// Replace a reference list with pointers to live entities.
    pub fn set_field_entities(&mut self, name: &str, targets: &[&Entity]) -> OdmResult<&mut Self> {
        let mut references = Vec::with_capacity(targets.len());
        for target in targets {
            self.check_target(name, target.model_name())?;
            references.push(target.reference()?);
        }
        self.set_field(name, Value::ReferenceList(references))
    }

    pub fn add_to_field(&mut self, name: &str, value: impl Into<Value>) -> OdmResult<&mut Self> {
        self.ensure_writable(name)?;
        self.field_mut(name)?.add_value(value)?;
        Ok(self)
    }

    pub fn remove_from_field(&mut self, name: &str, value: impl Into<Value>) -> OdmResult<&mut Self> {
        self.ensure_writable(name)?;
        self.field_mut(name)?.remove_value(value)?;
        Ok(self)
    }

    pub fn increment_field(&mut self, name: &str) -> OdmResult<&mut Self> {
        self.ensure_writable(name)?;
        self.field_mut(name)?.increment()?;
        Ok(self)
    }

    pub fn decrement_field(&mut self, name: &str) -> OdmResult<&mut Self> {
        self.ensure_writable(name)?;
        self.field_mut(name)?.decrement()?;
        Ok(self)
    }

    pub fn clear_field(&mut self, name: &str) -> OdmResult<&mut Self> {
        self.ensure_writable(name)?;
        self.field_mut(name)?.clear_value();
        Ok(self)
    }

    pub fn parent(&self) -> Option<Reference> {
        self.fields
            .get(PARENT_FIELD)
            .and_then(|f| f.value().as_reference().cloned())
    }

    pub fn children(&self) -> Vec<Reference> {
        self.fields
            .get(CHILDREN_FIELD)
            .and_then(|f| f.value().as_references().map(<[Reference]>::to_vec))
            .unwrap_or_default()
    }

    pub fn set_parent(&mut self, parent: &Entity) -> OdmResult<&mut Self> {
        self.set_field_entity(PARENT_FIELD, parent)
    }

    pub fn clear_parent(&mut self) -> OdmResult<&mut Self> {
        self.set_field(PARENT_FIELD, Value::Null)
    }

    pub fn add_child(&mut self, child: &Entity) -> OdmResult<&mut Self> {
        let reference = child.reference()?;
        self.add_to_field(CHILDREN_FIELD, reference)
    }

    pub fn remove_child(&mut self, child: &Reference) -> OdmResult<&mut Self> {
        self.remove_from_field(CHILDREN_FIELD, child.clone())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get(CREATED_FIELD).and_then(|f| f.value().as_datetime())
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get(MODIFIED_FIELD).and_then(|f| f.value().as_datetime())
    }

    /// Snapshot of every persisted field, without the `required` check.
    pub fn to_document(&self) -> Document {
        self.fields
            .iter()
            .filter(|f| !f.is_virtual())
            .map(|f| (f.name().to_string(), f.value().clone()))
            .collect()
    }

    /// First half of a save.
    ///
    /// Returns `None` for a clean entity, in which case nothing must be
    /// written. Otherwise runs the pre-save hook, stamps `_modified`, and
    /// collects the storable document, failing on the first invalid field
    /// before any IO. `_id` is omitted for new entities.
    pub fn prepare_save(&mut self, now: DateTime<Utc>) -> OdmResult<Option<Document>> {
        if self.is_deleted() {
            return Err(OdmError::EntityDeleted(self.model_name.clone()));
        }
        if !self.is_modified() {
            return Ok(None);
        }

        let model = Arc::clone(&self.model);
        model.pre_save(self)?;

        if self.created_at().is_none_or(|created| created > now) {
            self.base_field(CREATED_FIELD)?.set_value(now, true)?;
        }
        self.base_field(MODIFIED_FIELD)?.set_value(now, true)?;

        let is_new = self.is_new();
        let mut document = Document::new();
        for field in self.fields.iter() {
            if field.is_virtual() || (is_new && field.name() == ID_FIELD) {
                continue;
            }
            document.insert(field.name().to_string(), field.storable_value()?);
        }
        Ok(Some(document))
    }

    /// Second half of a save, after the store accepted the document.
    ///
    /// `assigned` is the store-assigned identifier of a first insert.
    pub fn complete_save(&mut self, assigned: Option<DocumentId>) -> OdmResult<()> {
        if self.is_new() {
            let id = assigned.ok_or_else(|| {
                OdmError::InvalidId(format!("no identifier assigned to new '{}'", self.model_name))
            })?;
            self.base_field(ID_FIELD)?.set_value(id, false)?;
            self.state = EntityState::Persisted;
        }

        let model = Arc::clone(&self.model);
        model.after_save(self)?;

        for field in self.fields.iter_mut() {
            field.reset_modified();
        }
        Ok(())
    }

    /// First half of a delete: pre-delete hook, then every field releases
    /// whatever it owns outside the document.
    pub fn prepare_delete(&mut self) -> OdmResult<()> {
        if self.is_deleted() {
            return Err(OdmError::EntityDeleted(self.model_name.clone()));
        }
        let model = Arc::clone(&self.model);
        model.pre_delete(self)?;
        for field in self.fields.iter() {
            field.on_delete()?;
        }
        Ok(())
    }

    /// Second half of a delete: the entity becomes terminal, then the
    /// after-delete hook runs.
    pub fn complete_delete(&mut self) -> OdmResult<()> {
        self.state = EntityState::Deleted;
        let model = Arc::clone(&self.model);
        model.after_delete(self)
    }

    /// Clear a stored reference whose target is gone.
    pub fn heal_reference(&mut self, name: &str) -> OdmResult<()> {
        if self.is_deleted() {
            return Err(OdmError::EntityDeleted(self.model_name.clone()));
        }
        self.field_mut(name)?.set_value(Value::Null, true)
    }

    fn check_target(&self, name: &str, target_model: &str) -> OdmResult<()> {
        match self.field(name)?.target_model() {
            Some(expected) if expected != target_model => Err(OdmError::type_mismatch(
                name,
                format!("entity of model '{expected}'"),
                format!("entity of model '{target_model}'"),
            )),
            _ => Ok(()),
        }
    }

    fn ensure_writable(&self, name: &str) -> OdmResult<()> {
        if self.is_deleted() {
            return Err(OdmError::EntityDeleted(self.model_name.clone()));
        }
        if PROTECTED_FIELDS.contains(&name) {
            return Err(OdmError::ProtectedField(name.to_string()));
        }
        Ok(())
    }

    fn field_mut(&mut self, name: &str) -> OdmResult<&mut Field> {
        let model = &self.model_name;
        self.fields
            .get_mut(name)
            .ok_or_else(|| OdmError::unknown_field(model, name))
    }

    fn base_field(&mut self, name: &str) -> OdmResult<&mut Field> {
        self.field_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlainModel;
    use std::sync::Mutex;

    struct Person {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Model for Person {
        fn setup_fields(&self, fields: &mut FieldSet) -> OdmResult<()> {
            fields
                .define(Field::string("name").required())?
                .define(Field::integer("age"))?
                .define(Field::reference("employer", "company"))?
                .define(Field::reference_list("friends", "person"))?
                .define(Field::virtual_field("display"))?;
            Ok(())
        }

        fn pre_save(&self, _entity: &mut Entity) -> OdmResult<()> {
            self.log.lock().unwrap().push("pre_save");
            Ok(())
        }

        fn after_save(&self, _entity: &mut Entity) -> OdmResult<()> {
            self.log.lock().unwrap().push("after_save");
            Ok(())
        }

        fn pre_delete(&self, _entity: &mut Entity) -> OdmResult<()> {
            self.log.lock().unwrap().push("pre_delete");
            Ok(())
        }

        fn after_delete(&self, entity: &mut Entity) -> OdmResult<()> {
            assert!(entity.is_deleted());
            self.log.lock().unwrap().push("after_delete");
            Ok(())
        }

        fn on_set_field(&self, _entity: &Entity, field: &str, value: Value) -> OdmResult<Value> {
            match (field, value) {
                ("name", Value::Str(s)) => Ok(Value::Str(s.to_uppercase())),
                (_, v) => Ok(v),
            }
        }
    }

    fn person() -> (Entity, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let model = Arc::new(Person { log: Arc::clone(&log) });
        (Entity::create("person", "persons", model, Utc::now()).unwrap(), log)
    }

    fn saved(entity: &mut Entity) -> DocumentId {
        entity.prepare_save(Utc::now()).unwrap();
        let id = DocumentId::new();
        entity.complete_save(Some(id)).unwrap();
        id
    }

    #[test]
    fn new_entity_is_modified_and_has_no_reference() {
        let (entity, _) = person();
        assert!(entity.is_new());
        assert!(entity.is_modified());
        assert!(entity.id().is_none());
        assert!(matches!(entity.reference(), Err(OdmError::InvalidReference(_))));
        assert_eq!(entity.get_field(MODEL_FIELD).unwrap(), Value::from("person"));
    }

    #[test]
    fn fields_keep_definition_order() {
        let (entity, _) = person();
        let names: Vec<_> = entity.fields().names().collect();
        assert_eq!(
            names,
            [
                ID_FIELD,
                MODEL_FIELD,
                PARENT_FIELD,
                CHILDREN_FIELD,
                CREATED_FIELD,
                MODIFIED_FIELD,
                "name",
                "age",
                "employer",
                "friends",
                "display"
            ]
        );
    }

    #[test]
    fn unknown_and_protected_fields_fail() {
        let (mut entity, _) = person();
        assert!(matches!(
            entity.set_field("nickname", "x").unwrap_err(),
            OdmError::UnknownField { .. }
        ));
        assert!(matches!(
            entity.get_field("nickname").unwrap_err(),
            OdmError::UnknownField { .. }
        ));
        assert_eq!(
            entity.set_field(ID_FIELD, DocumentId::new()).unwrap_err(),
            OdmError::ProtectedField(ID_FIELD.into())
        );
        assert!(entity.set_field(MODEL_FIELD, "other").is_err());
    }

    #[test]
    fn set_hook_rewrites_values() {
        let (mut entity, _) = person();
        entity.set_field("name", "ada").unwrap();
        assert_eq!(entity.get_field("name").unwrap(), Value::from("ADA"));
    }

    #[test]
    fn prepare_save_omits_id_and_virtual_fields_for_new_entities() {
        let (mut entity, log) = person();
        entity.set_field("name", "ada").unwrap();
        entity.set_field("display", "shown").unwrap();
        let doc = entity.prepare_save(Utc::now()).unwrap().unwrap();
        assert!(!doc.contains_key(ID_FIELD));
        assert!(!doc.contains_key("display"));
        assert_eq!(doc.get(MODEL_FIELD), Some(&Value::from("person")));
        assert_eq!(log.lock().unwrap().as_slice(), ["pre_save"]);
    }

    #[test]
    fn required_field_aborts_save_without_resetting_flags() {
        let (mut entity, _) = person();
        let err = entity.prepare_save(Utc::now()).unwrap_err();
        assert_eq!(err, OdmError::RequiredFieldEmpty("name".into()));
        assert!(entity.is_modified());
        assert!(entity.is_new());
    }

    #[test]
    fn complete_save_assigns_id_and_resets_flags() {
        let (mut entity, log) = person();
        entity.set_field("name", "ada").unwrap();
        let id = saved(&mut entity);
        assert_eq!(entity.id(), Some(id));
        assert_eq!(entity.state(), EntityState::Persisted);
        assert!(!entity.is_modified());
        assert!(entity.modified_at().unwrap() >= entity.created_at().unwrap());
        assert_eq!(entity.reference().unwrap(), Reference::new("persons", id));
        assert_eq!(log.lock().unwrap().as_slice(), ["pre_save", "after_save"]);
    }

    #[test]
    fn clean_entity_prepares_nothing() {
        let (mut entity, _) = person();
        entity.set_field("name", "ada").unwrap();
        saved(&mut entity);
        assert_eq!(entity.prepare_save(Utc::now()).unwrap(), None);
    }

    #[test]
    fn persisted_save_includes_id() {
        let (mut entity, _) = person();
        entity.set_field("name", "ada").unwrap();
        let id = saved(&mut entity);
        entity.set_field("age", 36).unwrap();
        let doc = entity.prepare_save(Utc::now()).unwrap().unwrap();
        assert_eq!(doc.get(ID_FIELD), Some(&Value::Id(id)));
    }

    #[test]
    fn from_document_is_clean_and_ignores_unknown_keys() {
        let id = DocumentId::new();
        let mut doc = Document::new();
        doc.insert(ID_FIELD.into(), Value::Id(id));
        doc.insert(MODEL_FIELD.into(), Value::from("person"));
        doc.insert("name".into(), Value::from("Ada"));
        doc.insert("legacy".into(), Value::from(1));
        let model: Arc<dyn Model> = Arc::new(Person {
            log: Arc::new(Mutex::new(Vec::new())),
        });
        let entity = Entity::from_document("person", "persons", model, doc).unwrap();
        assert!(!entity.is_modified());
        assert!(!entity.is_new());
        assert_eq!(entity.id(), Some(id));
        assert_eq!(entity.get_field("name").unwrap(), Value::from("Ada"));
    }

    #[test]
    fn from_document_requires_an_id() {
        let model: Arc<dyn Model> = Arc::new(PlainModel);
        let err = Entity::from_document("thing", "things", model, Document::new()).unwrap_err();
        assert!(matches!(err, OdmError::InvalidId(_)));
    }

    #[test]
    fn entity_references_check_target_model() {
        let (mut entity, _) = person();
        let (mut friend, _) = person();
        friend.set_field("name", "bob").unwrap();

        assert!(matches!(
            entity.set_field_entity("friends", &friend).unwrap_err(),
            OdmError::InvalidReference(_)
        ));

        let friend_id = saved(&mut friend);
        entity.set_field_entity("friends", &friend).unwrap();
        assert_eq!(
            entity.get_field("friends").unwrap(),
            Value::ReferenceList(vec![Reference::new("persons", friend_id)])
        );

        let err = entity.set_field_entity("employer", &friend).unwrap_err();
        assert_eq!(
            err,
            OdmError::type_mismatch("employer", "entity of model 'company'", "entity of model 'person'")
        );
        assert!(entity.get_field("employer").unwrap().is_null());
    }

    #[test]
    fn parent_and_children_accept_any_model() {
        let (mut parent, _) = person();
        parent.set_field("name", "p").unwrap();
        saved(&mut parent);

        let model: Arc<dyn Model> = Arc::new(PlainModel);
        let mut child = Entity::create("note", "notes", model, Utc::now()).unwrap();
        saved(&mut child);

        child.set_parent(&parent).unwrap();
        parent.add_child(&child).unwrap();
        parent.add_child(&child).unwrap();
        assert_eq!(child.parent(), Some(parent.reference().unwrap()));
        assert_eq!(parent.children(), vec![child.reference().unwrap()]);

        let child_ref = child.reference().unwrap();
        parent.remove_child(&child_ref).unwrap();
        assert!(parent.children().is_empty());
    }

    #[test]
    fn delete_is_terminal() {
        let (mut entity, log) = person();
        entity.set_field("name", "ada").unwrap();
        saved(&mut entity);
        entity.prepare_delete().unwrap();
        entity.complete_delete().unwrap();
        assert!(entity.is_deleted());
        assert!(matches!(
            entity.set_field("age", 1).unwrap_err(),
            OdmError::EntityDeleted(_)
        ));
        assert!(matches!(
            entity.prepare_save(Utc::now()).unwrap_err(),
            OdmError::EntityDeleted(_)
        ));
        assert!(matches!(entity.prepare_delete().unwrap_err(), OdmError::EntityDeleted(_)));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["pre_save", "after_save", "pre_delete", "after_delete"]
        );
    }

    #[test]
    fn collection_helpers_mark_modified() {
        let (mut entity, _) = person();
        entity.set_field("name", "ada").unwrap();
        saved(&mut entity);
        entity.increment_field("age").unwrap();
        assert!(entity.is_modified());
        assert_eq!(entity.get_field("age").unwrap(), Value::Int(1));
        assert!(matches!(
            entity.increment_field("name").unwrap_err(),
            OdmError::NotSupported { .. }
        ));
    }
}
