//! Filter predicates for locating resources.
//!
//! The builder does not check field names against a kind's filterable set;
//! callers validate criteria before building a predicate.

use std::fmt;

use serde_json::json;

use crate::state::{Attributes, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

/// Conjunction of field constraints. An empty predicate matches every
/// resource of the kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPredicate {
    constraints: Vec<Constraint>,
}

impl FilterPredicate {
    /// Build an equality predicate from candidate fields, skipping unset ones.
    pub fn build<'a, I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a Value>)>,
    {
        let constraints = candidates
            .into_iter()
            .filter_map(|(field, value)| {
                value.map(|value| Constraint {
                    field: field.to_string(),
                    op: Op::Eq,
                    value: value.clone(),
                })
            })
            .collect();
        Self { constraints }
    }

    pub fn from_attributes(criteria: &Attributes) -> Self {
        Self::build(criteria.iter().map(|(k, v)| (k.as_str(), Some(v))))
    }

    pub fn and_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.constraints.push(Constraint {
            field: field.to_string(),
            op: Op::Eq,
            value: value.into(),
        });
        self
    }

    pub fn and_ne(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.constraints.push(Constraint {
            field: field.to_string(),
            op: Op::Ne,
            value: value.into(),
        });
        self
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Evaluate the predicate against a set of attributes.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.constraints.iter().all(|c| {
            let actual = attributes.get(&c.field);
            match c.op {
                Op::Eq => actual == Some(&c.value),
                Op::Ne => actual != Some(&c.value),
            }
        })
    }

    /// Render as a Linode `X-Filter` document. `None` for an empty predicate.
    pub fn to_x_filter(&self) -> Option<serde_json::Value> {
        let clauses: Vec<serde_json::Value> = self
            .constraints
            .iter()
            .map(|c| match c.op {
                Op::Eq => json!({ c.field.as_str(): c.value.to_json() }),
                Op::Ne => json!({ c.field.as_str(): { "+neq": c.value.to_json() } }),
            })
            .collect();

        match clauses.len() {
            0 => None,
            _ => Some(json!({ "+and": clauses })),
        }
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return f.write_str("*");
        }
        let parts: Vec<String> = self
            .constraints
            .iter()
            .map(|c| match c.op {
                Op::Eq => format!("{} == {}", c.field, c.value),
                Op::Ne => format!("{} != {}", c.field, c.value),
            })
            .collect();
        f.write_str(&parts.join(" && "))
    }
}
