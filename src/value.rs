// src/value.rs

//! Canonical argument/result values.
//!
//! Every value that crosses a boundary in this engine (task arguments,
//! task results, cache payloads, the worker wire protocol) is a
//! [`Value`]: the JSON value set with integers and floats kept distinct.
//! Maps are `BTreeMap`s, so serializing a `Value` with `serde_json`
//! automatically yields the canonical form (sorted keys, no insignificant
//! whitespace).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tagged variant over the JSON value set.
///
/// `Int` is tried before `Float` when deserializing, so `1` and `1.0`
/// round-trip as distinct values and produce distinct canonical forms
/// (and therefore distinct fingerprints).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Canonical JSON serialization: compact, map keys sorted.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Check that the value stays inside the JSON value set.
    ///
    /// JSON text can never produce a non-finite float, but values built
    /// programmatically can. Returns the path of the first offender.
    pub fn check_json_representable(&self) -> std::result::Result<(), String> {
        fn walk(v: &Value, path: &str) -> std::result::Result<(), String> {
            match v {
                Value::Float(f) if !f.is_finite() => {
                    Err(format!("non-finite float at {path}"))
                }
                Value::Seq(items) => {
                    for (i, item) in items.iter().enumerate() {
                        walk(item, &format!("{path}[{i}]"))?;
                    }
                    Ok(())
                }
                Value::Map(map) => {
                    for (k, item) in map {
                        walk(item, &format!("{path}.{k}"))?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }
        walk(self, "$")
    }

    /// If this value is an argument reference `{"ref": "<task_id>"}`,
    /// return the referenced task id.
    pub fn as_ref_target(&self) -> Option<&str> {
        match self {
            Value::Map(map) if map.len() == 1 => match map.get("ref") {
                Some(Value::Str(id)) => Some(id.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Collect every argument-reference target in the tree, in traversal order.
pub fn collect_refs(value: &Value, out: &mut Vec<String>) {
    if let Some(id) = value.as_ref_target() {
        out.push(id.to_string());
        return;
    }
    match value {
        Value::Seq(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Map(map) => {
            for item in map.values() {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Replace every `{"ref": "<task_id>"}` with the looked-up result value.
///
/// The lookup only sees successful upstream tasks; a miss means the
/// workflow validator let an undeclared reference through, which callers
/// treat as an internal error.
pub fn resolve_refs<F>(value: &Value, lookup: &F) -> std::result::Result<Value, String>
where
    F: Fn(&str) -> Option<Value>,
{
    if let Some(id) = value.as_ref_target() {
        return lookup(id).ok_or_else(|| format!("unresolved reference to task '{id}'"));
    }
    match value {
        Value::Seq(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_refs(item, lookup)?);
            }
            Ok(Value::Seq(out))
        }
        Value::Map(map) => {
            let mut out = BTreeMap::new();
            for (k, item) in map {
                out.insert(k.clone(), resolve_refs(item, lookup)?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(other.clone()),
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

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}
