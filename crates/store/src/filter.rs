//! Native filter format accepted by document stores.
//!
//! A [`Filter`] is two ordered lists of conditions: every `and` condition must
//! hold, and when `or` is non-empty at least one of its conditions must hold
//! too. There is no nesting.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use docodm_core::{Document, SortDirection, Value};

use crate::document_store::StoreError;

/// Canonical comparison operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    In,
    NotIn,
    Regex,
    RegexInsensitive,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "$eq",
            Operator::NotEquals => "$ne",
            Operator::GreaterThan => "$gt",
            Operator::GreaterOrEqual => "$gte",
            Operator::LessThan => "$lt",
            Operator::LessOrEqual => "$lte",
            Operator::In => "$in",
            Operator::NotIn => "$nin",
            Operator::Regex => "$regex",
            Operator::RegexInsensitive => "$regex_i",
        }
    }

    /// Operators whose operand is a list of candidates.
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl core::fmt::Display for Operator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field name; dots address nested dict keys.
    pub field: String,
    pub op: Operator,
    pub operand: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Operator, operand: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            operand: operand.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub and: Vec<Condition>,
    pub or: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.and.push(condition);
        self
    }

    pub fn or(mut self, condition: Condition) -> Self {
        self.or.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.and.is_empty() && self.or.is_empty()
    }

    /// Validate operands and precompile patterns.
    pub fn compile(&self) -> Result<CompiledFilter, StoreError> {
        let compile_all = |conditions: &[Condition]| {
            conditions
                .iter()
                .map(Predicate::compile)
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(CompiledFilter {
            and: compile_all(&self.and)?,
            or: compile_all(&self.or)?,
        })
    }
}

/// Paging, ordering, and projection for `find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    /// Fields to return besides `_id`; `None` returns whole documents.
    pub projection: Option<Vec<String>>,
    pub skip: usize,
    /// Zero means unlimited.
    pub limit: usize,
    pub sort: Vec<(String, SortDirection)>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn sort(mut self, sort: Vec<(String, SortDirection)>) -> Self {
        self.sort = sort;
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// A filter ready to be evaluated against documents.
#[derive(Debug)]
pub struct CompiledFilter {
    and: Vec<Predicate>,
    or: Vec<Predicate>,
}

impl CompiledFilter {
    pub fn matches(&self, document: &Document) -> bool {
        self.and.iter().all(|p| p.matches(document))
            && (self.or.is_empty() || self.or.iter().any(|p| p.matches(document)))
    }
}

#[derive(Debug)]
struct Predicate {
    field: String,
    test: Test,
}

#[derive(Debug)]
enum Test {
    Eq(Value),
    Ne(Value),
    Cmp(Operator, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Pattern(Regex),
}

impl Predicate {
    fn compile(condition: &Condition) -> Result<Self, StoreError> {
        let operand = condition.operand.clone();
        let test = match condition.op {
            Operator::Equals => Test::Eq(operand),
            Operator::NotEquals => Test::Ne(operand),
            Operator::GreaterThan
            | Operator::GreaterOrEqual
            | Operator::LessThan
            | Operator::LessOrEqual => Test::Cmp(condition.op, operand),
            Operator::In | Operator::NotIn => {
                let candidates = match operand {
                    Value::List(items) => items,
                    Value::ReferenceList(refs) => refs.into_iter().map(Value::Reference).collect(),
                    other => {
                        return Err(StoreError::InvalidFilter(format!(
                            "'{}' on '{}' needs a list, got {}",
                            condition.op,
                            condition.field,
                            other.type_name()
                        )));
                    }
                };
                if condition.op == Operator::In {
                    Test::In(candidates)
                } else {
                    Test::Nin(candidates)
                }
            }
            Operator::Regex | Operator::RegexInsensitive => {
                let pattern = operand.as_str().ok_or_else(|| {
                    StoreError::InvalidFilter(format!(
                        "'{}' on '{}' needs a string pattern",
                        condition.op, condition.field
                    ))
                })?;
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(condition.op == Operator::RegexInsensitive)
                    .build()
                    .map_err(|e| StoreError::InvalidFilter(format!("bad pattern: {e}")))?;
                Test::Pattern(regex)
            }
        };
        Ok(Self {
            field: condition.field.clone(),
            test,
        })
    }

    fn matches(&self, document: &Document) -> bool {
        let value = lookup(document, &self.field).unwrap_or(&Value::Null);
        match &self.test {
            Test::Eq(expected) => equals(value, expected),
            Test::Ne(expected) => !equals(value, expected),
            Test::In(candidates) => candidates.iter().any(|c| equals(value, c)),
            Test::Nin(candidates) => !candidates.iter().any(|c| equals(value, c)),
            Test::Cmp(op, bound) => any_element(value, |v| compare(*op, v, bound)),
            Test::Pattern(regex) => any_element(value, |v| v.as_str().is_some_and(|s| regex.is_match(s))),
        }
    }
}

/// Resolve a possibly dotted field path.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_dict()?.get(part)?;
    }
    Some(current)
}

/// Equality where a collection field matches if it contains the operand.
fn equals(value: &Value, expected: &Value) -> bool {
    if value.loosely_equals(expected) {
        return true;
    }
    match (value, expected) {
        (Value::List(items), _) => items.iter().any(|v| v.loosely_equals(expected)),
        (Value::ReferenceList(refs), Value::Reference(r)) => refs.contains(r),
        _ => false,
    }
}

fn any_element(value: &Value, test: impl Fn(&Value) -> bool) -> bool {
    match value {
        Value::List(items) => items.iter().any(test),
        other => test(other),
    }
}

fn compare(op: Operator, value: &Value, bound: &Value) -> bool {
    if value.is_null() {
        return false;
    }
    match value.compare(bound) {
        Some(ord) => match op {
            Operator::GreaterThan => ord == Ordering::Greater,
            Operator::GreaterOrEqual => ord != Ordering::Less,
            Operator::LessThan => ord == Ordering::Less,
            Operator::LessOrEqual => ord != Ordering::Greater,
            _ => false,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docodm_core::{DocumentId, Reference};
    use proptest::prelude::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn matches(filter: Filter, document: &Document) -> bool {
        filter.compile().unwrap().matches(document)
    }

    #[test]
    fn and_terms_all_hold_or_terms_any_hold() {
        let d = doc(&[("age", Value::Int(25)), ("name", Value::from("ada"))]);
        let f = Filter::new()
            .and(Condition::new("age", Operator::GreaterOrEqual, 18))
            .or(Condition::new("name", Operator::Equals, "bob"))
            .or(Condition::new("name", Operator::Equals, "ada"));
        assert!(matches(f, &d));

        let f = Filter::new()
            .and(Condition::new("age", Operator::GreaterOrEqual, 30))
            .or(Condition::new("name", Operator::Equals, "ada"));
        assert!(!matches(f, &d));
    }

    #[test]
    fn list_fields_match_by_containment() {
        let d = doc(&[("tags", Value::List(vec![Value::from("a"), Value::from("b")]))]);
        assert!(matches(Filter::new().and(Condition::new("tags", Operator::Equals, "b")), &d));
        assert!(!matches(Filter::new().and(Condition::new("tags", Operator::NotEquals, "b")), &d));
    }

    #[test]
    fn reference_lists_match_by_containment() {
        let r = Reference::new("people", DocumentId::new());
        let d = doc(&[("friends", Value::ReferenceList(vec![r.clone()]))]);
        assert!(matches(Filter::new().and(Condition::new("friends", Operator::Equals, r)), &d));
    }

    #[test]
    fn missing_fields_equal_null_only() {
        let d = doc(&[]);
        assert!(matches(Filter::new().and(Condition::new("x", Operator::Equals, Value::Null)), &d));
        assert!(!matches(Filter::new().and(Condition::new("x", Operator::GreaterThan, 1)), &d));
    }

    #[test]
    fn in_and_nin() {
        let d = doc(&[("n", Value::Int(2))]);
        let list = Value::List(vec![Value::Int(1), Value::Float(2.0)]);
        assert!(matches(Filter::new().and(Condition::new("n", Operator::In, list.clone())), &d));
        assert!(!matches(Filter::new().and(Condition::new("n", Operator::NotIn, list)), &d));
    }

    #[test]
    fn in_requires_a_list() {
        let f = Filter::new().and(Condition::new("n", Operator::In, 1));
        assert!(matches!(f.compile(), Err(StoreError::InvalidFilter(_))));
    }

    #[test]
    fn regex_and_case_insensitive_regex() {
        let d = doc(&[("name", Value::from("Ada Lovelace"))]);
        assert!(matches(Filter::new().and(Condition::new("name", Operator::Regex, "^Ada")), &d));
        assert!(!matches(Filter::new().and(Condition::new("name", Operator::Regex, "^ada")), &d));
        assert!(matches(
            Filter::new().and(Condition::new("name", Operator::RegexInsensitive, "^ada")),
            &d
        ));
        let bad = Filter::new().and(Condition::new("name", Operator::Regex, "("));
        assert!(bad.compile().is_err());
    }

    #[test]
    fn dotted_paths_reach_into_dicts() {
        let mut inner = std::collections::BTreeMap::new();
        inner.insert("city".to_string(), Value::from("Oslo"));
        let d = doc(&[("address", Value::Dict(inner))]);
        assert!(matches(
            Filter::new().and(Condition::new("address.city", Operator::Equals, "Oslo")),
            &d
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn range_matches_exactly_the_numbers_inside(n in -1000i64..1000, lo in -1000i64..1000, hi in -1000i64..1000) {
            let d = doc(&[("n", Value::Int(n))]);
            let f = Filter::new()
                .and(Condition::new("n", Operator::GreaterOrEqual, lo))
                .and(Condition::new("n", Operator::LessThan, hi));
            prop_assert_eq!(matches(f, &d), lo <= n && n < hi);
        }
    }
}
