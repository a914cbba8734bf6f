//! Structural JSON patches
//!
//! Produces RFC 6902 style `add`/`remove`/`replace` operations that turn one JSON
//! value into another. Object members are visited in key order. Arrays are
//! compared index by index: the common prefix is diffed in place, surplus left
//! elements are removed from the end backwards and new right elements are
//! appended in ascending order, so applying the operations in sequence is valid.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

/// One patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("values nest deeper than {0} levels")]
    TooDeep(usize),
}

/// Operations turning `left` into `right`.
///
/// Fails when both values keep nesting past `max_depth` levels.
pub fn diff_values(left: &Value, right: &Value, max_depth: usize) -> Result<Vec<PatchOp>, PatchError> {
    let mut ops = Vec::new();
    let mut path = Vec::new();
    walk(left, right, &mut path, 0, max_depth, &mut ops)?;
    Ok(ops)
}

/// RFC 6901 pointer for a token path
pub fn pointer(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("/{}", t.replace('~', "~0").replace('/', "~1")))
        .collect()
}

fn walk(
    left: &Value,
    right: &Value,
    path: &mut Vec<String>,
    depth: usize,
    max_depth: usize,
    ops: &mut Vec<PatchOp>,
) -> Result<(), PatchError> {
    if left == right {
        return Ok(());
    }
    if depth >= max_depth {
        return Err(PatchError::TooDeep(max_depth));
    }

    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            for key in keys {
                path.push(key.clone());
                match (l.get(key), r.get(key)) {
                    (Some(lv), Some(rv)) => walk(lv, rv, path, depth + 1, max_depth, ops)?,
                    (Some(_), None) => ops.push(PatchOp::Remove {
                        path: pointer(path),
                    }),
                    (None, Some(rv)) => ops.push(PatchOp::Add {
                        path: pointer(path),
                        value: rv.clone(),
                    }),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (Value::Array(l), Value::Array(r)) => {
            let common = l.len().min(r.len());
            for i in 0..common {
                path.push(i.to_string());
                walk(&l[i], &r[i], path, depth + 1, max_depth, ops)?;
                path.pop();
            }
            for i in (common..l.len()).rev() {
                path.push(i.to_string());
                ops.push(PatchOp::Remove {
                    path: pointer(path),
                });
                path.pop();
            }
            for (i, value) in r.iter().enumerate().skip(common) {
                path.push(i.to_string());
                ops.push(PatchOp::Add {
                    path: pointer(path),
                    value: value.clone(),
                });
                path.pop();
            }
        }
        _ => ops.push(PatchOp::Replace {
            path: pointer(path),
            value: right.clone(),
        }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_values_give_empty_patch() {
        let v = json!({"a": [1, 2, {"b": null}]});
        assert!(diff_values(&v, &v, 128).unwrap().is_empty());
    }

    #[test]
    fn test_object_members() {
        let ops = diff_values(
            &json!({"keep": 1, "drop": 2, "change": 3}),
            &json!({"keep": 1, "change": 4, "new": 5}),
            128,
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![
                PatchOp::Replace { path: "/change".into(), value: json!(4) },
                PatchOp::Remove { path: "/drop".into() },
                PatchOp::Add { path: "/new".into(), value: json!(5) },
            ]
        );
    }

    #[test]
    fn test_arrays_are_index_wise() {
        let ops = diff_values(&json!([1, 2, 3, 4]), &json!([1, 9]), 128).unwrap();
        assert_eq!(
            ops,
            vec![
                PatchOp::Replace { path: "/1".into(), value: json!(9) },
                PatchOp::Remove { path: "/3".into() },
                PatchOp::Remove { path: "/2".into() },
            ]
        );

        let ops = diff_values(&json!(["a"]), &json!(["a", "b", "c"]), 128).unwrap();
        assert_eq!(
            ops,
            vec![
                PatchOp::Add { path: "/1".into(), value: json!("b") },
                PatchOp::Add { path: "/2".into(), value: json!("c") },
            ]
        );
    }

    #[test]
    fn test_reordered_array_is_a_change() {
        let ops = diff_values(&json!(["x", "y"]), &json!(["y", "x"]), 128).unwrap();
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_type_change_and_root_replace() {
        let ops = diff_values(&json!({"a": 1}), &json!([1]), 128).unwrap();
        assert_eq!(ops, vec![PatchOp::Replace { path: "".into(), value: json!([1]) }]);
    }

    #[test]
    fn test_pointer_escaping() {
        let ops = diff_values(&json!({}), &json!({"a/b~c": 1}), 128).unwrap();
        assert_eq!(ops[0].path(), "/a~1b~0c");
    }

    #[test]
    fn test_depth_limit() {
        let mut left = json!(1);
        let mut right = json!(2);
        for _ in 0..10 {
            left = json!({ "n": left });
            right = json!({ "n": right });
        }
        assert!(matches!(diff_values(&left, &right, 5), Err(PatchError::TooDeep(5))));
        assert_eq!(diff_values(&left, &right, 64).unwrap().len(), 1);
    }

    #[test]
    fn test_op_serialization() {
        let op = PatchOp::Add { path: "/x".into(), value: json!(1) };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "add", "path": "/x", "value": 1})
        );
    }
}
