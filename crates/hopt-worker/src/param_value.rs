//! The worker's parameter object: an immutable nested tree with dot-path
//! access, realized as a typed tagged-variant tree that simply has no
//! mutating methods.

use hopt_base::constants::{PARAM_REF_CLOSE, PARAM_REF_OPEN, TIMESTAMP_TOKEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn from_json(value: &serde_json::Value) -> ParamValue {
        match value {
            serde_json::Value::Null => ParamValue::Str(String::new()),
            serde_json::Value::Bool(b) => ParamValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::Int(i)
                } else {
                    ParamValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => ParamValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ParamValue::Tuple(items.iter().map(ParamValue::from_json).collect())
            }
            serde_json::Value::Object(map) => ParamValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), ParamValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Dot-path lookup: `"model.lr"` descends through nested maps.
    pub fn get_path(&self, path: &str) -> Option<&ParamValue> {
        let mut current = self;
        for segment in path.split('.') {
            let ParamValue::Map(map) = current else {
                return None;
            };
            current = map.get(segment)?;
        }
        Some(current)
    }

    /// `update_recursive`: keys in `overlay` take priority, recursing into
    /// matching nested maps rather than replacing them wholesale.
    pub fn merge_recursive(base: &ParamValue, overlay: &ParamValue) -> ParamValue {
        match (base, overlay) {
            (ParamValue::Map(base_map), ParamValue::Map(overlay_map)) => {
                let mut merged = base_map.clone();
                for (k, v) in overlay_map {
                    let next = match merged.get(k) {
                        Some(existing) => ParamValue::merge_recursive(existing, v),
                        None => v.clone(),
                    };
                    merged.insert(k.clone(), next);
                }
                ParamValue::Map(merged)
            }
            (_, overlay) => overlay.clone(),
        }
    }

    /// Replaces every string leaf containing the `__timestamp__` token with
    /// `timestamp`, recursively. Applies the same substring substitution
    /// `model_dir` gets, generalized to every string leaf.
    pub fn resolve_timestamp(&self, timestamp: &str) -> ParamValue {
        match self {
            ParamValue::Str(s) if s.contains(TIMESTAMP_TOKEN) => {
                ParamValue::Str(s.replace(TIMESTAMP_TOKEN, timestamp))
            }
            ParamValue::Tuple(items) => ParamValue::Tuple(
                items.iter().map(|v| v.resolve_timestamp(timestamp)).collect(),
            ),
            ParamValue::Map(map) => ParamValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.resolve_timestamp(timestamp)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Resolves `${dotted.path}`-style cross-parameter references in every
    /// string leaf against the full tree, one pass (references are not
    /// chased transitively through other references), mirroring
    /// `original_source/cluster/settings.py`'s single construction-time
    /// pass over `default_params`. Call once, after merging and resolving
    /// `__timestamp__`, before the tree is handed out as immutable.
    pub fn resolve_references(&self) -> ParamValue {
        self.resolve_references_against(self)
    }

    fn resolve_references_against(&self, root: &ParamValue) -> ParamValue {
        match self {
            ParamValue::Str(s) => ParamValue::Str(substitute_references(s, root)),
            ParamValue::Tuple(items) => ParamValue::Tuple(
                items
                    .iter()
                    .map(|v| v.resolve_references_against(root))
                    .collect(),
            ),
            ParamValue::Map(map) => ParamValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.resolve_references_against(root)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Replaces every `${path}` occurrence in `s` with the rendered value at
/// `path` in `root`. A reference to a missing path is left untouched
/// rather than erroring: a typo here is a job misconfiguration, not a
/// protocol violation the orchestrator needs to reject at this layer.
fn substitute_references(s: &str, root: &ParamValue) -> String {
    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find(PARAM_REF_OPEN) {
        let after_open = start + PARAM_REF_OPEN.len();
        let Some(close_rel) = rest[after_open..].find(PARAM_REF_CLOSE) else {
            out.push_str(rest);
            rest = "";
            break;
        };
        let close = after_open + close_rel;
        out.push_str(&rest[..start]);
        let path = &rest[after_open..close];
        match root.get_path(path) {
            Some(value) => out.push_str(&render_leaf(value)),
            None => out.push_str(&rest[start..=close]),
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

fn render_leaf(value: &ParamValue) -> String {
    match value {
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Int(i) => i.to_string(),
        ParamValue::Float(f) => f.to_string(),
        ParamValue::Str(s) => s.clone(),
        ParamValue::Tuple(_) | ParamValue::Map(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn dot_path_descends_nested_maps() {
        let tree = ParamValue::Map(btreemap! {
            "model".to_string() => ParamValue::Map(btreemap! {
                "lr".to_string() => ParamValue::Float(0.1),
            }),
        });
        assert_eq!(tree.get_path("model.lr"), Some(&ParamValue::Float(0.1)));
        assert_eq!(tree.get_path("model.missing"), None);
        assert_eq!(tree.get_path("missing.lr"), None);
    }

    #[test]
    fn merge_recursive_overlays_nested_keys_without_clobbering_siblings() {
        let base = ParamValue::Map(btreemap! {
            "model".to_string() => ParamValue::Map(btreemap! {
                "lr".to_string() => ParamValue::Float(0.1),
                "depth".to_string() => ParamValue::Int(2),
            }),
        });
        let overlay = ParamValue::Map(btreemap! {
            "model".to_string() => ParamValue::Map(btreemap! {
                "lr".to_string() => ParamValue::Float(0.5),
            }),
        });
        let merged = ParamValue::merge_recursive(&base, &overlay);
        assert_eq!(merged.get_path("model.lr"), Some(&ParamValue::Float(0.5)));
        assert_eq!(merged.get_path("model.depth"), Some(&ParamValue::Int(2)));
    }

    #[test]
    fn resolve_timestamp_replaces_token_in_nested_strings() {
        let tree = ParamValue::Map(btreemap! {
            "model_dir".to_string() => ParamValue::Str("/runs/__timestamp__/out".to_string()),
            "name".to_string() => ParamValue::Str("unaffected".to_string()),
        });
        let resolved = tree.resolve_timestamp("2026-07-28T00-00-00");
        assert_eq!(
            resolved.get_path("model_dir"),
            Some(&ParamValue::Str("/runs/2026-07-28T00-00-00/out".to_string()))
        );
        assert_eq!(
            resolved.get_path("name"),
            Some(&ParamValue::Str("unaffected".to_string()))
        );
    }

    #[test]
    fn resolve_references_substitutes_a_dotted_path() {
        let tree = ParamValue::Map(btreemap! {
            "model".to_string() => ParamValue::Map(btreemap! {
                "lr".to_string() => ParamValue::Float(0.1),
            }),
            "run_name".to_string() => ParamValue::Str("lr-${model.lr}".to_string()),
        });
        let resolved = tree.resolve_references();
        assert_eq!(
            resolved.get_path("run_name"),
            Some(&ParamValue::Str("lr-0.1".to_string()))
        );
    }

    #[test]
    fn resolve_references_leaves_unknown_paths_untouched() {
        let tree = ParamValue::Map(btreemap! {
            "name".to_string() => ParamValue::Str("x-${missing.path}".to_string()),
        });
        let resolved = tree.resolve_references();
        assert_eq!(
            resolved.get_path("name"),
            Some(&ParamValue::Str("x-${missing.path}".to_string()))
        );
    }

    #[test]
    fn from_json_distinguishes_int_and_float() {
        let value: serde_json::Value = serde_json::json!({"a": 1, "b": 1.5});
        let tree = ParamValue::from_json(&value);
        assert_eq!(tree.get_path("a"), Some(&ParamValue::Int(1)));
        assert_eq!(tree.get_path("b"), Some(&ParamValue::Float(1.5)));
    }
}
