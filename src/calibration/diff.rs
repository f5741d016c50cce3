//! Structural diff and tolerance check over canonical parameter trees.

use serde::Serialize;

use crate::canonical::Value;

/// Kind of structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Present only in the new tree
    Added,
    /// Present only in the old tree
    Removed,
    /// Present in both with different values
    Modified,
}

/// One changed leaf, addressed by a dotted path such as `tls.cipherSuites`.
///
/// Lists are leaves: a reordered or edited list is one `Modified` change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Dotted path of the leaf
    pub path: String,
    /// What kind of change
    pub kind: ChangeKind,
    /// Value before the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Changes needed to turn `old` into `new`, in path order.
pub fn diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_into(old, new, "", &mut changes);
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn diff_into(old: &Value, new: &Value, path: &str, out: &mut Vec<Change>) {
    match (old, new) {
        (Value::Map(a), Value::Map(b)) => {
            for (key, old_value) in a {
                if !b.contains_key(key) {
                    out.push(Change {
                        path: join(path, key),
                        kind: ChangeKind::Removed,
                        old_value: Some(old_value.clone()),
                        new_value: None,
                    });
                }
            }
            for (key, new_value) in b {
                match a.get(key) {
                    None => out.push(Change {
                        path: join(path, key),
                        kind: ChangeKind::Added,
                        old_value: None,
                        new_value: Some(new_value.clone()),
                    }),
                    Some(old_value) => diff_into(old_value, new_value, &join(path, key), out),
                }
            }
        }
        _ if old != new => out.push(Change {
            path: path.to_owned(),
            kind: ChangeKind::Modified,
            old_value: Some(old.clone()),
            new_value: Some(new.clone()),
        }),
        _ => {}
    }
}

/// Whether `actual` matches `expected` within `percent`.
///
/// Maps must have identical key sets and lists identical lengths. Integers
/// may deviate by up to `percent` of the expected value, computed exactly:
/// `|actual - expected| * 100 <= |expected| * percent`. Everything else must
/// be equal.
pub fn within_tolerance(expected: &Value, actual: &Value, percent: u8) -> bool {
    match (expected, actual) {
        (Value::Map(e), Value::Map(a)) => {
            e.len() == a.len()
                && e.iter().all(|(key, ev)| {
                    a.get(key)
                        .map_or(false, |av| within_tolerance(ev, av, percent))
                })
        }
        (Value::Array(e), Value::Array(a)) => {
            e.len() == a.len()
                && e.iter()
                    .zip(a)
                    .all(|(ev, av)| within_tolerance(ev, av, percent))
        }
        (Value::Integer(e), Value::Integer(a)) => {
            let e = e.as_i128();
            let a = a.as_i128();
            (a - e).abs() * 100 <= e.abs() * i128::from(percent)
        }
        _ => expected == actual,
    }
}
