//! Deep structural equality between expected and actual values.
//!
//! Sequences compare in order, mappings by key set regardless of key order, and
//! numbers by the "same value" rule. The comparison is total: it never panics and
//! gives up (unequal) past [`MAX_DEPTH`] levels of nesting.

use crate::types::Value;

/// Nesting depth beyond which two values are considered unequal
pub const MAX_DEPTH: usize = 1024;

/// Structural equality of two values
#[must_use]
pub fn equal(a: &Value, b: &Value) -> bool {
    equal_at(a, b, 0)
}

fn equal_at(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }

    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x.same_value(*y),
        (Value::String(x), Value::String(y))
        | (Value::Bigint(x), Value::Bigint(y))
        | (Value::Opaque(x), Value::Opaque(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| equal_at(x, y, depth + 1))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(key, x)| {
                    ys.get(key)
                        .is_some_and(|y| equal_at(x, y, depth + 1))
                })
        }
        _ => false,
    }
}
