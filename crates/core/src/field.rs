//! Typed, named, change-tracked value cells.
//!
//! A [`Field`] owns one [`Value`] and knows how to type-check incoming values
//! for its [`FieldKind`], whether it has been modified since it was loaded or
//! last saved, and what it contributes to the stored document.
//!
//! ## Modification tracking
//!
//! `set_value(v, true)` marks the field modified even if `v` equals the current
//! value; there is no equality short-circuit. Loading from the store uses
//! `set_value(v, false)`, so freshly loaded fields are never modified.
//!
//! ## Reference fields
//!
//! `Reference` and `ReferenceList` fields hold raw [`Reference`] values only.
//! Resolving them into entities is the registry's job, so a field never keeps
//! a stale copy of another entity.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OdmError, OdmResult};
use crate::value::Value;

/// Callback run when the owning entity is deleted, given the field name and
/// its current value. File-backed fields use it to drop their blob.
pub type ReleaseHook = Arc<dyn Fn(&str, &Value) -> OdmResult<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    String {
        max_length: Option<usize>,
    },
    Integer,
    Float,
    Boolean,
    DateTime,
    Dict,
    List {
        unique: bool,
        min_len: Option<usize>,
        max_len: Option<usize>,
    },
    /// `model` restricts which model a live entity must belong to when the
    /// field is set from one; `None` accepts any model.
    Reference {
        model: Option<String>,
    },
    ReferenceList {
        model: Option<String>,
        unique: bool,
    },
    /// Never persisted.
    Virtual,
}

impl FieldKind {
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Id => "identifier",
            FieldKind::String { .. } => "string",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::DateTime => "datetime",
            FieldKind::Dict => "dict",
            FieldKind::List { .. } => "list",
            FieldKind::Reference { .. } => "reference",
            FieldKind::ReferenceList { .. } => "reference list",
            FieldKind::Virtual => "virtual",
        }
    }

    fn empty_value(&self) -> Value {
        match self {
            FieldKind::String { .. } => Value::Str(String::new()),
            FieldKind::Integer => Value::Int(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::Boolean => Value::Bool(false),
            FieldKind::Dict => Value::Dict(Default::default()),
            FieldKind::List { .. } => Value::List(Vec::new()),
            FieldKind::ReferenceList { .. } => Value::ReferenceList(Vec::new()),
            FieldKind::Id | FieldKind::DateTime | FieldKind::Reference { .. } | FieldKind::Virtual => {
                Value::Null
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldOptions {
    pub required: bool,
    pub default: Option<Value>,
}

#[derive(Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    options: FieldOptions,
    value: Value,
    modified: bool,
    release: Option<ReleaseHook>,
}

impl core::fmt::Debug for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("value", &self.value)
            .field("modified", &self.modified)
            .field("release", &self.release.is_some())
            .finish()
    }
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let value = kind.empty_value();
        Self {
            name: name.into(),
            kind,
            options: FieldOptions::default(),
            value,
            modified: false,
            release: None,
        }
    }

    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Id)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String { max_length: None })
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn dict(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Dict)
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::List {
                unique: false,
                min_len: None,
                max_len: None,
            },
        )
    }

    pub fn reference(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                model: Some(model.into()),
            },
        )
    }

    /// Reference to an entity of any model (used for `_parent`).
    pub fn any_reference(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Reference { model: None })
    }

    pub fn reference_list(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::ReferenceList {
                model: Some(model.into()),
                unique: false,
            },
        )
    }

    /// Reference list accepting entities of any model (used for `_children`).
    pub fn any_reference_list(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::ReferenceList {
                model: None,
                unique: true,
            },
        )
    }

    pub fn virtual_field(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Virtual)
    }

    pub fn required(mut self) -> Self {
        self.options.required = true;
        self
    }

    /// Initial value. It must satisfy the field's kind; `FieldSet::define`
    /// checks it.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.value = value.clone();
        self.options.default = Some(value);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let FieldKind::String { max_length } = &mut self.kind {
            *max_length = Some(max);
        }
        self
    }

    /// Drop duplicates on set and ignore duplicate adds (list kinds only).
    pub fn unique(mut self) -> Self {
        match &mut self.kind {
            FieldKind::List { unique, .. } | FieldKind::ReferenceList { unique, .. } => {
                *unique = true;
            }
            _ => {}
        }
        self
    }

    pub fn min_len(mut self, min: usize) -> Self {
        if let FieldKind::List { min_len, .. } = &mut self.kind {
            *min_len = Some(min);
        }
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        if let FieldKind::List { max_len, .. } = &mut self.kind {
            *max_len = Some(max);
        }
        self
    }

    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &Value) -> OdmResult<()> + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, FieldKind::Virtual)
    }

    /// Model a live entity must belong to before it can be referenced here.
    pub fn target_model(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference { model } | FieldKind::ReferenceList { model, .. } => {
                model.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn reset_modified(&mut self) {
        self.modified = false;
    }

    /// In-memory value. Reference kinds return their raw references.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<Value>, change_modified: bool) -> OdmResult<()> {
        let value = self.coerce(value.into())?;
        self.value = value;
        self.modified = self.modified || change_modified;
        Ok(())
    }

    /// Value written to the store.
    pub fn storable_value(&self) -> OdmResult<Value> {
        if self.options.required && self.value.is_empty() {
            return Err(OdmError::RequiredFieldEmpty(self.name.clone()));
        }
        Ok(self.value.clone())
    }

    /// Check a query argument against this field.
    ///
    /// Reference fields only ever match references, so any other argument
    /// (or list element, for `in`/`nin`) is a type error. Other kinds pass
    /// through unchanged.
    pub fn finder_arg(&self, arg: Value) -> OdmResult<Value> {
        if !matches!(self.kind, FieldKind::Reference { .. } | FieldKind::ReferenceList { .. }) {
            return Ok(arg);
        }
        match arg {
            v @ (Value::Reference(_) | Value::ReferenceList(_) | Value::Null) => Ok(v),
            Value::List(items) => {
                if let Some(bad) = items
                    .iter()
                    .find(|item| !matches!(item, Value::Reference(_) | Value::Null))
                {
                    return Err(self.mismatch("reference", bad));
                }
                Ok(Value::List(items))
            }
            other => Err(self.mismatch("reference", &other)),
        }
    }

    /// Restore the default (or the kind's empty value).
    pub fn clear_value(&mut self) {
        self.value = self
            .options
            .default
            .clone()
            .unwrap_or_else(|| self.kind.empty_value());
        self.modified = true;
    }

    /// Append to a collection, merge into a dict, or add to a number.
    pub fn add_value(&mut self, value: impl Into<Value>) -> OdmResult<()> {
        let value = value.into();
        let next = match (&self.kind, &self.value) {
            (FieldKind::List { unique, max_len, .. }, Value::List(items)) => {
                if *unique && items.contains(&value) {
                    return Ok(());
                }
                if max_len.is_some_and(|max| items.len() + 1 > max) {
                    return Err(self.length_error("more than", max_len.unwrap_or_default()));
                }
                let mut items = items.clone();
                items.push(value);
                Value::List(items)
            }
            (FieldKind::ReferenceList { unique, .. }, Value::ReferenceList(refs)) => {
                let reference = match value {
                    Value::Reference(r) => r,
                    other => return Err(self.mismatch("reference", &other)),
                };
                if *unique && refs.contains(&reference) {
                    return Ok(());
                }
                let mut refs = refs.clone();
                refs.push(reference);
                Value::ReferenceList(refs)
            }
            (FieldKind::Dict, Value::Dict(map)) => match value {
                Value::Dict(extra) => {
                    let mut map = map.clone();
                    map.extend(extra);
                    Value::Dict(map)
                }
                other => return Err(self.mismatch("dict", &other)),
            },
            (FieldKind::Integer | FieldKind::Float, _) => self.arithmetic(&value, 1)?,
            _ => return Err(OdmError::not_supported(&self.name, "add")),
        };
        self.value = next;
        self.modified = true;
        Ok(())
    }

    /// Remove every equal element, drop a dict key, or subtract from a number.
    pub fn remove_value(&mut self, value: impl Into<Value>) -> OdmResult<()> {
        let value = value.into();
        let next = match (&self.kind, &self.value) {
            (FieldKind::List { min_len, .. }, Value::List(items)) => {
                let kept: Vec<Value> = items.iter().filter(|v| **v != value).cloned().collect();
                if min_len.is_some_and(|min| kept.len() < min) {
                    return Err(self.length_error("less than", min_len.unwrap_or_default()));
                }
                Value::List(kept)
            }
            (FieldKind::ReferenceList { .. }, Value::ReferenceList(refs)) => {
                let reference = match value {
                    Value::Reference(r) => r,
                    other => return Err(self.mismatch("reference", &other)),
                };
                Value::ReferenceList(refs.iter().filter(|r| **r != reference).cloned().collect())
            }
            (FieldKind::Dict, Value::Dict(map)) => match value {
                Value::Str(key) => {
                    let mut map = map.clone();
                    map.remove(&key);
                    Value::Dict(map)
                }
                other => return Err(self.mismatch("string key", &other)),
            },
            (FieldKind::Integer | FieldKind::Float, _) => self.arithmetic(&value, -1)?,
            _ => return Err(OdmError::not_supported(&self.name, "remove")),
        };
        self.value = next;
        self.modified = true;
        Ok(())
    }

    pub fn increment(&mut self) -> OdmResult<()> {
        self.step(1, "increment")
    }

    pub fn decrement(&mut self) -> OdmResult<()> {
        self.step(-1, "decrement")
    }

    /// Deletion notice from the owning entity.
    pub fn on_delete(&self) -> OdmResult<()> {
        match &self.release {
            Some(hook) => hook(&self.name, &self.value),
            None => Ok(()),
        }
    }

    fn step(&mut self, sign: i64, operation: &str) -> OdmResult<()> {
        match self.kind {
            FieldKind::Integer | FieldKind::Float => {
                self.value = self.arithmetic(&Value::Int(1), sign)?;
                self.modified = true;
                Ok(())
            }
            _ => Err(OdmError::not_supported(&self.name, operation)),
        }
    }

    fn arithmetic(&self, operand: &Value, sign: i64) -> OdmResult<Value> {
        match (&self.kind, &self.value, operand) {
            (FieldKind::Integer, Value::Int(current), Value::Int(delta)) => current
                .checked_add(delta.saturating_mul(sign))
                .map(Value::Int)
                .ok_or_else(|| OdmError::invalid_value(&self.name, "integer overflow")),
            (FieldKind::Integer, _, other) => Err(self.mismatch("integer", other)),
            (FieldKind::Float, current, delta) => match (current.as_f64(), delta.as_f64()) {
                (Some(current), Some(delta)) => Ok(Value::Float(current + delta * sign as f64)),
                _ => Err(self.mismatch("number", delta)),
            },
            _ => Err(OdmError::not_supported(&self.name, "arithmetic")),
        }
    }

    /// Type-check and normalize an incoming value for this field's kind.
    pub fn coerce(&self, value: Value) -> OdmResult<Value> {
        match (&self.kind, value) {
            (FieldKind::Virtual, v) => Ok(v),

            (FieldKind::Id, v @ (Value::Id(_) | Value::Null)) => Ok(v),

            (FieldKind::String { .. }, Value::Null) => Ok(Value::Str(String::new())),
            (FieldKind::String { max_length }, Value::Str(s)) => {
                let s = s.trim().to_string();
                if let Some(max) = max_length {
                    if s.chars().count() > *max {
                        return Err(OdmError::invalid_value(
                            &self.name,
                            format!("value length cannot be more than {max}"),
                        ));
                    }
                }
                Ok(Value::Str(s))
            }

            (FieldKind::Integer, v @ Value::Int(_)) => Ok(v),
            (FieldKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (FieldKind::Float, v @ Value::Float(_)) => Ok(v),
            (FieldKind::Boolean, v @ Value::Bool(_)) => Ok(v),
            (FieldKind::DateTime, v @ (Value::DateTime(_) | Value::Null)) => Ok(v),

            (FieldKind::Dict, Value::Null) => Ok(Value::Dict(Default::default())),
            (FieldKind::Dict, v @ Value::Dict(_)) => Ok(v),

            (FieldKind::List { .. }, Value::Null) => Ok(Value::List(Vec::new())),
            (FieldKind::List { unique, min_len, max_len }, Value::List(items)) => {
                let items = if *unique { dedup(items) } else { items };
                if let Some(min) = min_len {
                    if items.len() < *min {
                        return Err(self.length_error("less than", *min));
                    }
                }
                if let Some(max) = max_len {
                    if items.len() > *max {
                        return Err(self.length_error("more than", *max));
                    }
                }
                Ok(Value::List(items))
            }

            (FieldKind::Reference { .. }, v @ (Value::Reference(_) | Value::Null)) => Ok(v),

            (FieldKind::ReferenceList { .. }, Value::Null) => Ok(Value::ReferenceList(Vec::new())),
            (FieldKind::ReferenceList { unique, .. }, Value::ReferenceList(refs)) => {
                Ok(Value::ReferenceList(if *unique { dedup(refs) } else { refs }))
            }
            (FieldKind::ReferenceList { unique, .. }, Value::List(items)) => {
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Reference(r) => refs.push(r),
                        other => return Err(self.mismatch("list of references", &other)),
                    }
                }
                Ok(Value::ReferenceList(if *unique { dedup(refs) } else { refs }))
            }

            (kind, other) => Err(self.mismatch(kind.label(), &other)),
        }
    }

    fn mismatch(&self, expected: &str, found: &Value) -> OdmError {
        OdmError::type_mismatch(&self.name, expected, found.type_name())
    }

    fn length_error(&self, bound: &str, limit: usize) -> OdmError {
        OdmError::invalid_value(&self.name, format!("value length cannot be {bound} {limit}"))
    }
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Ordered set of fields; iteration follows definition order.
#[derive(Debug, Clone)]
pub struct FieldSet {
    model: String,
    fields: Vec<Field>,
    positions: HashMap<String, usize>,
}

impl FieldSet {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fields: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Add a field. Names are unique and a declared default must fit the kind.
    pub fn define(&mut self, field: Field) -> OdmResult<&mut Self> {
        if self.positions.contains_key(field.name()) {
            return Err(OdmError::FieldAlreadyDefined {
                model: self.model.clone(),
                field: field.name().to_string(),
            });
        }
        let mut field = field;
        let initial = field.value.clone();
        field.value = field.coerce(initial)?;
        self.positions.insert(field.name().to_string(), self.fields.len());
        self.fields.push(field);
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        match self.positions.get(name) {
            Some(&i) => Some(&mut self.fields[i]),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.fields.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(Field::name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DocumentId;
    use crate::reference::Reference;
    use std::sync::Mutex;

    fn reference() -> Reference {
        Reference::new("people", DocumentId::new())
    }

    #[test]
    fn reference_finder_args_must_be_references() {
        let field = Field::reference("owner", "person");
        let r = reference();
        assert_eq!(field.finder_arg(Value::Reference(r.clone())).unwrap(), Value::Reference(r.clone()));
        assert_eq!(
            field.finder_arg(Value::List(vec![Value::Reference(r.clone())])).unwrap(),
            Value::List(vec![Value::Reference(r)])
        );
        assert!(matches!(
            field.finder_arg(Value::Int(3)).unwrap_err(),
            OdmError::TypeMismatch { .. }
        ));
        assert!(matches!(
            field.finder_arg(Value::List(vec![Value::from("x")])).unwrap_err(),
            OdmError::TypeMismatch { .. }
        ));
        assert_eq!(Field::integer("n").finder_arg(Value::from("7")).unwrap(), Value::from("7"));
    }

    #[test]
    fn set_value_marks_modified_even_for_same_value() {
        let mut f = Field::integer("age");
        f.set_value(0, true).unwrap();
        assert!(f.is_modified());
    }

    #[test]
    fn loading_does_not_mark_modified() {
        let mut f = Field::string("title");
        f.set_value("hello", false).unwrap();
        assert!(!f.is_modified());
        assert_eq!(f.value(), &Value::Str("hello".into()));
    }

    #[test]
    fn string_field_rejects_integers_and_trims() {
        let mut f = Field::string("title");
        let err = f.set_value(5, true).unwrap_err();
        assert!(matches!(err, OdmError::TypeMismatch { .. }));
        assert!(!f.is_modified());

        f.set_value("  padded  ", true).unwrap();
        assert_eq!(f.value().as_str(), Some("padded"));
    }

    #[test]
    fn string_max_length_is_enforced() {
        let mut f = Field::string("code").max_length(3);
        assert!(f.set_value("abc", true).is_ok());
        let err = f.set_value("abcd", true).unwrap_err();
        assert!(matches!(err, OdmError::InvalidValue { .. }));
    }

    #[test]
    fn required_field_fails_only_at_storable_time() {
        let mut f = Field::string("title").required();
        f.set_value("", true).unwrap();
        assert_eq!(
            f.storable_value().unwrap_err(),
            OdmError::RequiredFieldEmpty("title".into())
        );
        f.set_value("x", true).unwrap();
        assert_eq!(f.storable_value().unwrap(), Value::Str("x".into()));
    }

    #[test]
    fn float_accepts_integers() {
        let mut f = Field::float("ratio");
        f.set_value(2, true).unwrap();
        assert_eq!(f.value(), &Value::Float(2.0));
        f.add_value(0.5).unwrap();
        assert_eq!(f.value(), &Value::Float(2.5));
    }

    #[test]
    fn integer_arithmetic() {
        let mut f = Field::integer("count");
        f.add_value(5).unwrap();
        f.increment().unwrap();
        f.remove_value(2).unwrap();
        f.decrement().unwrap();
        assert_eq!(f.value(), &Value::Int(3));
        assert!(matches!(
            f.add_value("x").unwrap_err(),
            OdmError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn scalar_kinds_do_not_support_collection_ops() {
        let mut f = Field::boolean("active");
        assert!(matches!(f.add_value(true).unwrap_err(), OdmError::NotSupported { .. }));
        assert!(matches!(f.increment().unwrap_err(), OdmError::NotSupported { .. }));
        let mut s = Field::string("name");
        assert!(matches!(s.remove_value("a").unwrap_err(), OdmError::NotSupported { .. }));
    }

    #[test]
    fn unique_list_drops_duplicates() {
        let mut f = Field::list("tags").unique();
        f.set_value(vec![Value::from("a"), Value::from("b"), Value::from("a")], true)
            .unwrap();
        assert_eq!(f.value().as_list().unwrap().len(), 2);
        f.add_value("b").unwrap();
        assert_eq!(f.value().as_list().unwrap().len(), 2);
        f.add_value("c").unwrap();
        assert_eq!(f.value().as_list().unwrap().len(), 3);
    }

    #[test]
    fn list_length_bounds() {
        let mut f = Field::list("slots").min_len(1).max_len(2);
        assert!(matches!(
            f.set_value(Vec::<Value>::new(), true).unwrap_err(),
            OdmError::InvalidValue { .. }
        ));
        f.set_value(vec![Value::from(1), Value::from(2)], true).unwrap();
        assert!(f.add_value(3).is_err());
        f.remove_value(1).unwrap();
        assert!(f.remove_value(2).is_err());
    }

    #[test]
    fn reference_list_add_and_remove() {
        let mut f = Field::reference_list("friends", "person").unique();
        let a = reference();
        let b = reference();
        f.add_value(a.clone()).unwrap();
        f.add_value(a.clone()).unwrap();
        f.add_value(b.clone()).unwrap();
        assert_eq!(f.value().as_references().unwrap(), &[a.clone(), b.clone()]);
        f.remove_value(a).unwrap();
        assert_eq!(f.value().as_references().unwrap(), &[b]);
        assert!(f.add_value("nope").is_err());
    }

    #[test]
    fn reference_list_accepts_list_of_references() {
        let mut f = Field::reference_list("friends", "person");
        let r = reference();
        f.set_value(vec![Value::Reference(r.clone())], true).unwrap();
        assert_eq!(f.value(), &Value::ReferenceList(vec![r]));
        assert!(f.set_value(vec![Value::from(1)], true).is_err());
    }

    #[test]
    fn dict_merge_and_key_removal() {
        let mut f = Field::dict("meta");
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("k".to_string(), Value::from(1));
        f.add_value(extra).unwrap();
        assert_eq!(f.value().as_dict().unwrap().len(), 1);
        f.remove_value("k").unwrap();
        assert!(f.value().is_empty());
    }

    #[test]
    fn clear_value_restores_default() {
        let mut f = Field::integer("level").with_default(7);
        f.set_value(9, true).unwrap();
        f.reset_modified();
        f.clear_value();
        assert_eq!(f.value(), &Value::Int(7));
        assert!(f.is_modified());
    }

    #[test]
    fn release_hook_receives_current_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut f = Field::string("blob").on_release(move |name, value| {
            sink.lock().unwrap().push(format!("{name}={value}"));
            Ok(())
        });
        f.set_value("file-1", true).unwrap();
        f.on_delete().unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), ["blob=file-1"]);
    }

    #[test]
    fn field_set_keeps_definition_order_and_rejects_duplicates() {
        let mut set = FieldSet::new("person");
        set.define(Field::string("name")).unwrap();
        set.define(Field::integer("age")).unwrap();
        let err = set.define(Field::integer("age")).unwrap_err();
        assert!(matches!(err, OdmError::FieldAlreadyDefined { .. }));
        assert_eq!(set.names().collect::<Vec<_>>(), ["name", "age"]);
    }

    #[test]
    fn field_set_checks_defaults() {
        let mut set = FieldSet::new("person");
        let err = set.define(Field::integer("age").with_default("old")).unwrap_err();
        assert!(matches!(err, OdmError::TypeMismatch { .. }));
    }
}
