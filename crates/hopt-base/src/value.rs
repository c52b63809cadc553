use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single parameter or metric value: boolean, string, integer, float, or a
/// fixed-length tuple of those. `Tuple` nests recursively so callers can
/// build fixed-length tuples of tuples, but `Settings` values are expected
/// to bottom out in scalars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
}

impl Value {
    /// Best-effort conversion to `f64`, used by the optimizer and the
    /// laggard killer, which only ever rank numeric metrics.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(_) | Value::Tuple(_) => None,
        }
    }

    /// Renders the value the way the CSV writers want it: one cell, no
    /// quoting beyond what strings need.
    pub fn to_csv_cell(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_csv_cell).collect();
                format!("({})", inner.join(";"))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_csv_cell())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

/// A parameter setting: a flat mapping of name to scalar value. Ordered by
/// key (`BTreeMap`) so CSV rows and JSON dumps are deterministic.
pub type Settings = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn as_f64_covers_numeric_variants() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::Str("x".into()).as_f64(), None);
    }

    #[test]
    fn settings_iterate_in_key_order() {
        let settings: Settings = btreemap! {
            "zeta".to_string() => Value::Int(1),
            "alpha".to_string() => Value::Int(2),
        };
        let keys: Vec<&str> = settings.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }
}
