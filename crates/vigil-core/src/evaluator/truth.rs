//! Three-valued condition evaluation.
//!
//! A comparison is `Unknown` when the property is absent or its value cannot
//! be compared with the expected one. Combinators follow Kleene logic, so an
//! `all` containing an `Unknown` and no `False` is `Unknown`.

use std::cmp::Ordering;

use serde_json::Value;
use vigil_evidence::Resource;
use vigil_registry::{Comparator, Comparison, Condition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    fn not(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    fn and(self, other: Self) -> Self {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    fn or(self, other: Self) -> Self {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }
}

/// Evaluate `condition` against one resource.
pub fn eval(condition: &Condition, resource: &Resource) -> Truth {
    match condition {
        Condition::All { all } => all
            .iter()
            .fold(Truth::True, |acc, c| acc.and(eval(c, resource))),
        Condition::Any { any } => any
            .iter()
            .fold(Truth::False, |acc, c| acc.or(eval(c, resource))),
        Condition::Not { not } => eval(not, resource).not(),
        Condition::Compare(cmp) => compare(cmp, resource.property(&cmp.property)),
    }
}

fn compare(cmp: &Comparison, actual: Option<&Value>) -> Truth {
    let Some(actual) = actual else {
        return match cmp.op {
            Comparator::Exists => Truth::False,
            Comparator::NotExists => Truth::True,
            _ => Truth::Unknown,
        };
    };

    let expected = cmp.value.as_ref();
    match cmp.op {
        Comparator::Exists => Truth::True,
        Comparator::NotExists => Truth::False,
        Comparator::Equals => Truth::from_bool(expected.is_some_and(|e| values_equal(actual, e))),
        Comparator::NotEquals => {
            Truth::from_bool(expected.is_some_and(|e| values_equal(actual, e))).not()
        }
        Comparator::In => membership(actual, expected),
        Comparator::NotIn => membership(actual, expected).not(),
        Comparator::Contains => contains(actual, expected),
        Comparator::NotContains => contains(actual, expected).not(),
        Comparator::GreaterThan => ordering(actual, expected, |o| o == Ordering::Greater),
        Comparator::GreaterOrEqual => ordering(actual, expected, |o| o != Ordering::Less),
        Comparator::LessThan => ordering(actual, expected, |o| o == Ordering::Less),
        Comparator::LessOrEqual => ordering(actual, expected, |o| o != Ordering::Greater),
    }
}

/// JSON equality with numbers compared by value (`1` equals `1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn membership(actual: &Value, expected: Option<&Value>) -> Truth {
    match expected {
        Some(Value::Array(options)) => {
            Truth::from_bool(options.iter().any(|o| values_equal(actual, o)))
        }
        _ => Truth::Unknown,
    }
}

fn contains(actual: &Value, expected: Option<&Value>) -> Truth {
    match (actual, expected) {
        (Value::String(haystack), Some(Value::String(needle))) => {
            Truth::from_bool(haystack.contains(needle.as_str()))
        }
        (Value::Array(items), Some(needle)) => {
            Truth::from_bool(items.iter().any(|item| values_equal(item, needle)))
        }
        _ => Truth::Unknown,
    }
}

fn ordering(actual: &Value, expected: Option<&Value>, accept: impl Fn(Ordering) -> bool) -> Truth {
    let ord = match (actual, expected) {
        (Value::Number(a), Some(Value::Number(b))) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Some(Value::String(b))) => Some(a.cmp(b)),
        _ => None,
    };
    ord.map_or(Truth::Unknown, |o| Truth::from_bool(accept(o)))
}
