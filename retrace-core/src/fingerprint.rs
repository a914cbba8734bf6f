//! Canonical serialization and content fingerprints
//!
//! A fingerprint identifies a call by its kind, name and arguments. Arguments are
//! first reduced to a [`CanonicalForm`]: either the JSON value serde produces, or an
//! explicit opaque marker for values serde refuses. The canonical text has every
//! object key sorted at every depth, so the SHA-256 over it does not depend on
//! insertion order, process or call sequence.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Marker key for values that could not be serialized
pub const OPAQUE_KEY: &str = "$opaque";

/// Total canonicalization result
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalForm {
    /// The value serialized cleanly
    Json(Value),
    /// Serialization failed; only a textual description survives
    Opaque { type_name: String, repr: String },
}

impl CanonicalForm {
    /// Canonicalize any serializable value.
    ///
    /// Never fails: when serde rejects the value (for example a map with
    /// non-string keys) the result is an [`Opaque`](Self::Opaque) carrying the
    /// type name and the serializer's message.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => CanonicalForm::Json(json),
            Err(e) => {
                let type_name = std::any::type_name::<T>().to_string();
                tracing::warn!(type_name = %type_name, error = %e, "falling back to opaque canonical form");
                CanonicalForm::Opaque {
                    type_name,
                    repr: e.to_string(),
                }
            }
        }
    }

    /// Like [`of`](Self::of), but opaque values keep their `Debug` rendering, so
    /// two different unserializable values never share a canonical form.
    ///
    /// serde_json turns non-finite floats into `null`; those values are made
    /// opaque as well so `NaN` and `null` stay distinct.
    pub fn of_debug<T: Serialize + Debug + ?Sized>(value: &T) -> Self {
        match Self::of(value) {
            CanonicalForm::Opaque { type_name, .. } => CanonicalForm::Opaque {
                type_name,
                repr: format!("{:?}", value),
            },
            CanonicalForm::Json(json) if contains_null(&json) => {
                let repr = format!("{:?}", value);
                if has_non_finite_float(&repr) {
                    tracing::warn!(repr = %repr, "non-finite float in canonical form, keeping it opaque");
                    CanonicalForm::Opaque {
                        type_name: std::any::type_name::<T>().to_string(),
                        repr,
                    }
                } else {
                    CanonicalForm::Json(json)
                }
            }
            json => json,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, CanonicalForm::Opaque { .. })
    }

    /// Collapse into a JSON value; opaque forms become `{"$opaque": {...}}`
    pub fn into_value(self) -> Value {
        match self {
            CanonicalForm::Json(json) => json,
            CanonicalForm::Opaque { type_name, repr } => {
                let mut inner = Map::new();
                inner.insert("type".to_string(), Value::String(type_name));
                inner.insert("repr".to_string(), Value::String(repr));
                let mut outer = Map::new();
                outer.insert(OPAQUE_KEY.to_string(), Value::Object(inner));
                Value::Object(outer)
            }
        }
    }
}

fn contains_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().any(contains_null),
        Value::Object(map) => map.values().any(contains_null),
        _ => false,
    }
}

/// Whether a `Debug` rendering holds a `NaN` or `inf` float outside string literals
fn has_non_finite_float(repr: &str) -> bool {
    let mut chars = repr.chars().peekable();
    let mut word = String::new();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        // a trailing ':' marks a field name, not a value
        if (word == "NaN" || word == "inf") && c != ':' {
            return true;
        }
        word.clear();
        in_string = c == '"';
    }
    word == "NaN" || word == "inf"
}

/// Canonicalize straight to a JSON value
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Value {
    CanonicalForm::of(value).into_value()
}

/// Render a value as JSON text with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of a string
pub fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of raw bytes
pub fn hash_bytes(input: &[u8]) -> String {
    format!("{:x}", Sha256::digest(input))
}

/// Positional and keyword arguments of an instrumented call, already canonical.
///
/// Serialized as `{"args": [...], "kwargs": {...}}`, which is also the `request`
/// payload of tool spans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    /// No arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + Debug + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(CanonicalForm::of_debug(value).into_value());
        self
    }

    /// Set a keyword argument
    pub fn kwarg<T: Serialize + Debug + ?Sized>(mut self, key: impl Into<String>, value: &T) -> Self {
        self.kwargs.insert(key.into(), CanonicalForm::of_debug(value).into_value());
        self
    }

    /// Derive arguments from a single input value.
    ///
    /// Unit and `null` give no arguments, sequences and tuples become positional
    /// arguments, structs and maps become keyword arguments, and anything else is
    /// a single positional argument.
    pub fn from_input<T: Serialize + Debug + ?Sized>(input: &T) -> Self {
        match CanonicalForm::of_debug(input).into_value() {
            Value::Null => Self::new(),
            Value::Array(args) => Self {
                args,
                kwargs: BTreeMap::new(),
            },
            Value::Object(map) if !map.contains_key(OPAQUE_KEY) => Self {
                args: Vec::new(),
                kwargs: map.into_iter().collect(),
            },
            other => Self {
                args: vec![other],
                kwargs: BTreeMap::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// The canonical JSON value of these arguments
    pub fn to_value(&self) -> Value {
        canonicalize(self)
    }
}

/// Fingerprint a call by kind, name and arguments.
///
/// Timing and ambient context never enter the digest.
pub fn fingerprint(kind: &str, name: &str, args: &CallArgs) -> String {
    let mut payload = Map::new();
    payload.insert("kind".to_string(), Value::String(kind.to_string()));
    payload.insert("name".to_string(), Value::String(name.to_string()));
    payload.insert("args".to_string(), Value::Array(args.args.clone()));
    payload.insert(
        "kwargs".to_string(),
        Value::Object(args.kwargs.clone().into_iter().collect()),
    );
    hash_str(&canonical_json(&Value::Object(payload)))
}

/// Fingerprint of a graph node, which depends on its position in the graph
/// (name and implementing function) rather than on the state it receives
pub fn node_fingerprint(name: &str, function: &str) -> String {
    hash_str(&format!("node:{}:{}", name, function))
}
