//! Field conditions and the matcher deciding whether a mutation concerns a listener

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Predicate over a field's runtime value. Receives `None` when the field is absent.
pub type FieldPredicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Condition declared on a single field
#[derive(Clone)]
pub enum Condition {
    /// Deep-equal to the value
    Equals(Value),
    /// Member of the set
    OneOf(Vec<Value>),
    /// Field is present in the arguments (an explicit `null` counts as present)
    Present,
    /// Custom predicate
    Predicate(FieldPredicate),
}

impl Condition {
    pub fn equals(value: impl Into<Value>) -> Self {
        Condition::Equals(value.into())
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Arc::new(f))
    }

    /// Evaluate against a candidate value.
    pub fn check(&self, candidate: Option<&Value>) -> bool {
        match self {
            Condition::Present => candidate.is_some(),
            Condition::Equals(expected) => candidate == Some(expected),
            Condition::OneOf(allowed) => candidate.map_or(false, |v| allowed.contains(v)),
            Condition::Predicate(f) => f(candidate),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            Condition::OneOf(v) => f.debug_tuple("OneOf").field(v).finish(),
            Condition::Present => f.write_str("Present"),
            Condition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Conditions keyed by field name, all of which must hold
#[derive(Debug, Clone, Default)]
pub struct FieldFilter {
    conditions: BTreeMap<String, Condition>,
}

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(name.into(), condition);
        self
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True when every condition holds for the matching field of `section`.
    ///
    /// A missing or non-object section makes every field absent.
    pub fn matches(&self, section: Option<&Value>) -> bool {
        let fields = section.and_then(Value::as_object);
        self.conditions
            .iter()
            .all(|(name, condition)| condition.check(fields.and_then(|f| f.get(name))))
    }
}

/// `where_filter` is checked against `args.where`, `data_filter` against `args.data`.
/// Absent filters always pass.
pub fn matches(
    where_filter: Option<&FieldFilter>,
    data_filter: Option<&FieldFilter>,
    args: &Value,
) -> bool {
    let where_ok = where_filter.map_or(true, |f| f.matches(args.get("where")));
    let data_ok = data_filter.map_or(true, |f| f.matches(args.get("data")));
    where_ok && data_ok
}
