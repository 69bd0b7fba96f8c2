//! Fluent queries over one model.

use docodm_core::entity::ID_FIELD;
use docodm_core::{Entity, OdmError, OdmResult, SortDirection, Value};
use docodm_store::{Cursor, DocumentStore, FindOptions};
use tracing::instrument;

use crate::handle::EntityHandle;
use crate::query::Query;
use crate::registry::Registry;

/// Query builder bound to a registry and a model.
///
/// Field names are validated against a throwaway, never-saved entity of the
/// model as soon as they are given, so typos fail at build time rather than
/// silently matching nothing.
pub struct Finder<'r, S> {
    registry: &'r Registry<S>,
    model_name: String,
    probe: Entity,
    query: Query,
    skip: usize,
    sort: Vec<(String, SortDirection)>,
}

impl<'r, S: DocumentStore> Finder<'r, S> {
    pub(crate) fn new(registry: &'r Registry<S>, model_name: &str) -> OdmResult<Self> {
        Ok(Self {
            registry,
            model_name: model_name.to_string(),
            probe: registry.new_entity(model_name)?,
            query: Query::new(),
            skip: 0,
            sort: Vec::new(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Add a required criterion.
    pub fn and_where(mut self, field: &str, op: &str, arg: impl Into<Value>) -> OdmResult<Self> {
        self.query.add_criteria(&self.probe, "and", field, op, arg)?;
        Ok(self)
    }

    /// Add an alternative criterion.
    pub fn or_where(mut self, field: &str, op: &str, arg: impl Into<Value>) -> OdmResult<Self> {
        self.query.add_criteria(&self.probe, "or", field, op, arg)?;
        Ok(self)
    }

    /// Require a reference field to point at `target`. The target must have
    /// been saved.
    pub fn and_where_entity(self, field: &str, op: &str, target: &EntityHandle) -> OdmResult<Self> {
        let reference = target.reference()?;
        self.and_where(field, op, reference)
    }

    pub fn or_where_entity(self, field: &str, op: &str, target: &EntityHandle) -> OdmResult<Self> {
        let reference = target.reference()?;
        self.or_where(field, op, reference)
    }

    pub fn add_criteria(
        mut self,
        logical_op: &str,
        field: &str,
        op: &str,
        arg: impl Into<Value>,
    ) -> OdmResult<Self> {
        self.query.add_criteria(&self.probe, logical_op, field, op, arg)?;
        Ok(self)
    }

    pub fn remove_criteria(mut self, logical_op: &str, field: &str) -> OdmResult<Self> {
        self.query.remove_criteria(logical_op, field)?;
        Ok(self)
    }

    /// Replace the sort order. Every field must exist on the model.
    pub fn sort<I, F>(mut self, fields: I) -> OdmResult<Self>
    where
        I: IntoIterator<Item = (F, SortDirection)>,
        F: Into<String>,
    {
        let mut sort = Vec::new();
        for (field, direction) in fields {
            let field = field.into();
            self.check_field(&field)?;
            sort.push((field, direction));
        }
        self.sort = sort;
        Ok(self)
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Number of criteria.
    pub fn len(&self) -> usize {
        self.query.len()
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    /// Matching documents after `skip`.
    pub fn count(&self) -> OdmResult<usize> {
        Ok(self.registry.store().count(
            &self.registry.context(),
            self.probe.collection(),
            &self.query.to_filter(),
            self.skip,
            0,
        )?)
    }

    /// Run the query. `limit == 0` is unlimited.
    ///
    /// The store only returns identifiers; each element is dispensed through
    /// the registry, so results share identity with every other live handle.
    #[instrument(skip(self), fields(model = %self.model_name, criteria = self.query.len()), level = "debug")]
    pub fn get(&self, limit: usize) -> OdmResult<ResultSequence<'r, S>> {
        let options = FindOptions::new()
            .skip(self.skip)
            .limit(limit)
            .sort(self.sort.clone())
            .project(Vec::<String>::new());
        let cursor = self.registry.store().find(
            &self.registry.context(),
            self.probe.collection(),
            &self.query.to_filter(),
            &options,
        )?;
        Ok(ResultSequence {
            registry: self.registry,
            model_name: self.model_name.clone(),
            cursor,
        })
    }

    pub fn first(&self) -> OdmResult<Option<EntityHandle>> {
        self.get(1)?.next().transpose()
    }

    /// Distinct values of `field` among matching documents, in first-seen
    /// order. List values contribute their elements.
    pub fn distinct(&self, field: &str) -> OdmResult<Vec<Value>> {
        self.check_field(field)?;
        let options = FindOptions::new()
            .skip(self.skip)
            .sort(self.sort.clone())
            .project([field]);
        let cursor = self.registry.store().find(
            &self.registry.context(),
            self.probe.collection(),
            &self.query.to_filter(),
            &options,
        )?;

        let mut seen: Vec<Value> = Vec::new();
        for document in cursor {
            let values = match document.get(field) {
                Some(Value::List(items)) => items.clone(),
                Some(Value::ReferenceList(refs)) => refs.iter().cloned().map(Value::Reference).collect(),
                Some(value) => vec![value.clone()],
                None => Vec::new(),
            };
            for value in values {
                if !seen.contains(&value) {
                    seen.push(value);
                }
            }
        }
        Ok(seen)
    }

    fn check_field(&self, field: &str) -> OdmResult<()> {
        let root = field.split('.').next().unwrap_or(field);
        if self.probe.has_field(root) {
            Ok(())
        } else {
            Err(OdmError::unknown_field(&self.model_name, field))
        }
    }
}

/// Lazy, single-pass query results.
///
/// Documents deleted between the query and their turn in the sequence are
/// skipped.
pub struct ResultSequence<'r, S> {
    registry: &'r Registry<S>,
    model_name: String,
    cursor: Cursor,
}

impl<S: DocumentStore> Iterator for ResultSequence<'_, S> {
    type Item = OdmResult<EntityHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let document = self.cursor.next()?;
            let Some(id) = document.get(ID_FIELD).and_then(Value::as_id) else {
                return Some(Err(OdmError::InvalidId(format!(
                    "'{}' query returned a document without identifier",
                    self.model_name
                ))));
            };
            match self.registry.dispense(&self.model_name, Some(id)) {
                Ok(Some(handle)) => return Some(Ok(handle)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docodm_core::{Field, FieldSet, Model};
    use docodm_store::InMemoryDocumentStore;
    use std::sync::Arc;

    struct Article;

    impl Model for Article {
        fn setup_fields(&self, fields: &mut FieldSet) -> OdmResult<()> {
            fields
                .define(Field::string("title"))?
                .define(Field::integer("views"))?
                .define(Field::list("tags"))?
                .define(Field::reference("related", "article"))?;
            Ok(())
        }
    }

    fn seeded() -> Registry<InMemoryDocumentStore> {
        let r = Registry::new(InMemoryDocumentStore::new());
        r.register_model("article", Arc::new(Article), false).unwrap();
        for (title, views, tags) in [
            ("alpha", 5, vec!["rust", "db"]),
            ("beta", 50, vec!["rust"]),
            ("gamma", 500, vec!["go"]),
        ] {
            let h = r.create("article").unwrap();
            h.set_field("title", title).unwrap();
            h.set_field("views", views).unwrap();
            h.set_field("tags", tags.into_iter().map(Value::from).collect::<Vec<_>>())
                .unwrap();
            r.save(&h).unwrap();
        }
        r
    }

    fn titles(finder: &Finder<'_, InMemoryDocumentStore>) -> Vec<String> {
        finder
            .get(0)
            .unwrap()
            .map(|h| h.unwrap().get_field("title").unwrap().to_string())
            .collect()
    }

    #[test]
    fn sort_skip_and_first() {
        let r = seeded();
        let finder = r
            .find("article")
            .unwrap()
            .sort([("views", SortDirection::Descending)])
            .unwrap();
        assert_eq!(titles(&finder), ["gamma", "beta", "alpha"]);

        let finder = finder.skip(1);
        assert_eq!(titles(&finder), ["beta", "alpha"]);
        assert_eq!(finder.count().unwrap(), 2);
        let first = finder.first().unwrap().unwrap();
        assert_eq!(first.get_field("title").unwrap(), Value::from("beta"));
    }

    #[test]
    fn sort_on_unknown_field_fails() {
        let r = seeded();
        let err = r
            .find("article")
            .unwrap()
            .sort([("rating", SortDirection::Ascending)])
            .err()
            .unwrap();
        assert!(matches!(err, OdmError::UnknownField { .. }));
    }

    #[test]
    fn or_terms_are_alternatives() {
        let r = seeded();
        let finder = r
            .find("article")
            .unwrap()
            .or_where("title", "=", "alpha")
            .unwrap()
            .or_where("views", ">", 100)
            .unwrap();
        assert_eq!(finder.len(), 2);
        assert_eq!(titles(&finder), ["alpha", "gamma"]);
    }

    #[test]
    fn regex_filters() {
        let r = seeded();
        let finder = r
            .find("article")
            .unwrap()
            .and_where("title", "regex_i", "^A")
            .unwrap();
        assert_eq!(titles(&finder), ["alpha"]);
    }

    #[test]
    fn distinct_flattens_lists() {
        let r = seeded();
        let tags = r.find("article").unwrap().distinct("tags").unwrap();
        assert_eq!(tags, vec![Value::from("rust"), Value::from("db"), Value::from("go")]);
        let finder = r.find("article").unwrap();
        assert!(finder.distinct("nope").is_err());
    }

    #[test]
    fn removed_criteria_stop_filtering() {
        let r = seeded();
        let finder = r
            .find("article")
            .unwrap()
            .and_where("views", ">", 10)
            .unwrap();
        assert_eq!(finder.count().unwrap(), 2);
        let finder = finder.remove_criteria("and", "views").unwrap();
        assert!(finder.is_empty());
        assert_eq!(finder.count().unwrap(), 3);
    }

    #[test]
    fn reference_criteria_accept_live_entities() {
        let r = seeded();
        let by_title = |title: &str| {
            r.find("article")
                .unwrap()
                .and_where("title", "=", title)
                .unwrap()
                .first()
                .unwrap()
                .unwrap()
        };
        let alpha = by_title("alpha");
        let gamma = by_title("gamma");
        gamma.set_field_entity("related", &alpha).unwrap();
        r.save(&gamma).unwrap();

        let finder = r
            .find("article")
            .unwrap()
            .and_where_entity("related", "=", &alpha)
            .unwrap();
        assert_eq!(titles(&finder), ["gamma"]);

        let unsaved = r.create("article").unwrap();
        let err = r
            .find("article")
            .unwrap()
            .and_where_entity("related", "=", &unsaved)
            .err()
            .unwrap();
        assert!(matches!(err, OdmError::InvalidReference(_)));
        let err = r.find("article").unwrap().and_where("related", "=", 5).err().unwrap();
        assert!(matches!(err, OdmError::TypeMismatch { .. }));
    }

    #[test]
    fn results_share_identity_with_live_handles() {
        let r = seeded();
        let finder = r.find("article").unwrap().and_where("title", "=", "beta").unwrap();
        let a = finder.first().unwrap().unwrap();
        let b = finder.first().unwrap().unwrap();
        assert!(a.same_entity(&b));
    }
}
