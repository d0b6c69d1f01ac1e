//! Facet validators.
//!
//! A [`Validator`] is a pure predicate over a JSON value. The runtime applies
//! the validators of a field in registration order and stops at the first one
//! that rejects the value.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde_json::{Number, Value};

use crate::types::semantic_eq;

/// A regular expression that must match the whole string.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile `source` anchored at both ends.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// A single facet check.
#[derive(Debug, Clone)]
pub enum Validator {
    MinLength(usize),
    MaxLength(usize),
    Matches(Pattern),
    ValueSet(Vec<Value>),
    MultipleOf(Number),
    Minimum { limit: Number, exclusive: bool },
    Maximum { limit: Number, exclusive: bool },
    MinItems(usize),
    MaxItems(usize),
    UniqueItems,
    /// Every element of a list must satisfy every inner validator.
    ListItems(Vec<Validator>),
}

impl Validator {
    pub fn min_length(n: usize) -> Self {
        Validator::MinLength(n)
    }

    pub fn max_length(n: usize) -> Self {
        Validator::MaxLength(n)
    }

    /// Full-string regex match.
    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Pattern::new(pattern).map(Validator::Matches)
    }

    pub fn value_set<I, V>(allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Validator::ValueSet(allowed.into_iter().map(Into::into).collect())
    }

    pub fn multiple_of(m: impl Into<Number>) -> Self {
        Validator::MultipleOf(m.into())
    }

    pub fn minimum(limit: impl Into<Number>, exclusive: bool) -> Self {
        Validator::Minimum {
            limit: limit.into(),
            exclusive,
        }
    }

    pub fn maximum(limit: impl Into<Number>, exclusive: bool) -> Self {
        Validator::Maximum {
            limit: limit.into(),
            exclusive,
        }
    }

    pub fn min_items(n: usize) -> Self {
        Validator::MinItems(n)
    }

    pub fn max_items(n: usize) -> Self {
        Validator::MaxItems(n)
    }

    pub fn unique_items() -> Self {
        Validator::UniqueItems
    }

    pub fn list_items(inner: Vec<Validator>) -> Self {
        Validator::ListItems(inner)
    }

    /// The single allowed value, if this is a one-element value set.
    pub fn literal(&self) -> Option<&Value> {
        match self {
            Validator::ValueSet(values) if values.len() == 1 => values.first(),
            _ => None,
        }
    }

    /// Returns true if `value` satisfies this facet.
    ///
    /// A value of the wrong JSON kind for the facet is rejected.
    pub fn check(&self, value: &Value) -> bool {
        match self {
            Validator::MinLength(n) => value
                .as_str()
                .map(|s| s.chars().count() >= *n)
                .unwrap_or(false),
            Validator::MaxLength(n) => value
                .as_str()
                .map(|s| s.chars().count() <= *n)
                .unwrap_or(false),
            Validator::Matches(pattern) => {
                value.as_str().map(|s| pattern.is_match(s)).unwrap_or(false)
            }
            Validator::ValueSet(allowed) => allowed.iter().any(|a| semantic_eq(a, value)),
            Validator::MultipleOf(m) => match value {
                Value::Number(n) => is_multiple_of(n, m),
                _ => false,
            },
            Validator::Minimum { limit, exclusive } => match value {
                Value::Number(n) => match compare_numbers(n, limit) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => !exclusive,
                    _ => false,
                },
                _ => false,
            },
            Validator::Maximum { limit, exclusive } => match value {
                Value::Number(n) => match compare_numbers(n, limit) {
                    Some(Ordering::Less) => true,
                    Some(Ordering::Equal) => !exclusive,
                    _ => false,
                },
                _ => false,
            },
            Validator::MinItems(n) => value.as_array().map(|a| a.len() >= *n).unwrap_or(false),
            Validator::MaxItems(n) => value.as_array().map(|a| a.len() <= *n).unwrap_or(false),
            Validator::UniqueItems => match value {
                Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .all(|(i, a)| items[i + 1..].iter().all(|b| !semantic_eq(a, b))),
                _ => false,
            },
            Validator::ListItems(inner) => match value {
                Value::Array(items) => items
                    .iter()
                    .all(|item| inner.iter().all(|v| v.check(item))),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::MinLength(n) => write!(f, "minLength({})", n),
            Validator::MaxLength(n) => write!(f, "maxLength({})", n),
            Validator::Matches(p) => write!(f, "matches({:?})", p.as_str()),
            Validator::ValueSet(values) => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "valueSet({})", rendered.join(", "))
            }
            Validator::MultipleOf(m) => write!(f, "multipleOf({})", m),
            Validator::Minimum { limit, exclusive } => {
                write!(f, "minimum({}, exclusive={})", limit, exclusive)
            }
            Validator::Maximum { limit, exclusive } => {
                write!(f, "maximum({}, exclusive={})", limit, exclusive)
            }
            Validator::MinItems(n) => write!(f, "minItems({})", n),
            Validator::MaxItems(n) => write!(f, "maxItems({})", n),
            Validator::UniqueItems => write!(f, "uniqueItems"),
            Validator::ListItems(inner) => {
                let rendered: Vec<String> = inner.iter().map(ToString::to_string).collect();
                write!(f, "listItems[{}]", rendered.join(", "))
            }
        }
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Distance from `x` to the next representable float away from zero.
fn ulp(x: f64) -> f64 {
    let x = x.abs();
    if !x.is_finite() {
        return f64::NAN;
    }
    f64::from_bits(x.to_bits() + 1) - x
}

fn is_multiple_of(value: &Number, divisor: &Number) -> bool {
    if let (Some(v), Some(m)) = (value.as_i64(), divisor.as_i64()) {
        if v == 0 {
            return true;
        }
        // checked_rem also covers i64::MIN % -1.
        return v.checked_rem(m).is_some_and(|r| r == 0);
    }

    let (Some(v), Some(m)) = (value.as_f64(), divisor.as_f64()) else {
        return false;
    };
    if v == 0.0 {
        return true;
    }
    if m == 0.0 || !m.is_finite() || !v.is_finite() {
        return false;
    }
    let quotient = v / m;
    if quotient.fract() == 0.0 {
        return true;
    }
    // Within one ULP of the nearest exact multiple.
    let nearest = quotient.round() * m;
    (v - nearest).abs() <= ulp(v)
}
