//! Criteria accumulation and operator translation.
//!
//! Callers write operators the way they remember them (`>=`, `gte`, `$gte`,
//! `GTE`); [`parse_operator`] maps every alias onto one canonical
//! [`Operator`]. Criteria collect into two flat groups: `and` terms are all
//! required, `or` terms are alternatives. The two groups are handed to the
//! store as-is, without extra bracketing.

use core::str::FromStr;

use docodm_core::entity::ID_FIELD;
use docodm_core::{DocumentId, Entity, OdmError, OdmResult, Value};
use docodm_store::{Condition, Filter, Operator};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl FromStr for LogicalOperator {
    type Err = OdmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "and" => Ok(LogicalOperator::And),
            "or" => Ok(LogicalOperator::Or),
            _ => Err(OdmError::InvalidLogicalOperator(s.to_string())),
        }
    }
}

/// Canonical operator for a symbolic or named alias.
pub fn parse_operator(s: &str) -> OdmResult<Operator> {
    let op = match normalize(s).as_str() {
        "=" | "==" | "eq" => Operator::Equals,
        "!=" | "ne" => Operator::NotEquals,
        ">" | "gt" => Operator::GreaterThan,
        ">=" | "gte" => Operator::GreaterOrEqual,
        "<" | "lt" => Operator::LessThan,
        "<=" | "lte" => Operator::LessOrEqual,
        "in" => Operator::In,
        "nin" => Operator::NotIn,
        "regex" => Operator::Regex,
        "regex_i" => Operator::RegexInsensitive,
        _ => return Err(OdmError::InvalidOperator(s.to_string())),
    };
    Ok(op)
}

fn normalize(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('$').unwrap_or(s).to_ascii_lowercase()
}

/// Accumulated criteria for one model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    and_terms: Vec<Condition>,
    or_terms: Vec<Condition>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append one criterion.
    ///
    /// Checks run in order: logical operator, comparison operator, then the
    /// field name against `probe`'s schema. Dotted paths address nested dict
    /// keys and are not checked. String identifiers given for `_id` are
    /// parsed, reference fields only take references, and a scalar argument
    /// to `in`/`nin` becomes a one-element list.
    pub fn add_criteria(
        &mut self,
        probe: &Entity,
        logical_op: &str,
        field: &str,
        comparison_op: &str,
        arg: impl Into<Value>,
    ) -> OdmResult<()> {
        let logical: LogicalOperator = logical_op.parse()?;
        let op = parse_operator(comparison_op)?;

        let mut arg = arg.into();
        if field == ID_FIELD {
            arg = sanitize_ids(arg)?;
        } else if !field.contains('.') {
            arg = probe.field(field)?.finder_arg(arg)?;
        }
        if op.takes_list() {
            arg = match arg {
                list @ (Value::List(_) | Value::ReferenceList(_)) => list,
                scalar => Value::List(vec![scalar]),
            };
        }
        if matches!(op, Operator::Regex | Operator::RegexInsensitive) && arg.as_str().is_none() {
            return Err(OdmError::type_mismatch(field, "string pattern", arg.type_name()));
        }

        let condition = Condition::new(field, op, arg);
        match logical {
            LogicalOperator::And => self.and_terms.push(condition),
            LogicalOperator::Or => self.or_terms.push(condition),
        }
        Ok(())
    }

    /// Drop every criterion on `field` in one group. Returns how many were
    /// removed.
    pub fn remove_criteria(&mut self, logical_op: &str, field: &str) -> OdmResult<usize> {
        let terms = match logical_op.parse::<LogicalOperator>()? {
            LogicalOperator::And => &mut self.and_terms,
            LogicalOperator::Or => &mut self.or_terms,
        };
        let before = terms.len();
        terms.retain(|c| c.field != field);
        Ok(before - terms.len())
    }

    /// Number of criteria across both groups.
    pub fn len(&self) -> usize {
        self.and_terms.len() + self.or_terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn and_terms(&self) -> &[Condition] {
        &self.and_terms
    }

    pub fn or_terms(&self) -> &[Condition] {
        &self.or_terms
    }

    pub fn to_filter(&self) -> Filter {
        Filter {
            and: self.and_terms.clone(),
            or: self.or_terms.clone(),
        }
    }
}

fn sanitize_ids(arg: Value) -> OdmResult<Value> {
    match arg {
        Value::Str(s) => Ok(Value::Id(DocumentId::from_str(&s)?)),
        Value::List(items) => items
            .into_iter()
            .map(sanitize_ids)
            .collect::<OdmResult<Vec<_>>>()
            .map(Value::List),
        other @ (Value::Id(_) | Value::Null) => Ok(other),
        other => Err(OdmError::type_mismatch(ID_FIELD, "identifier", other.type_name())),
    }
}
