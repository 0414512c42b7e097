use std::cmp::Ordering;

use serde_json::Value;

/// Orders view keys the way the document store does:
/// `null < false < true < numbers < strings < arrays < objects`.
///
/// Strings compare case-insensitively first with lowercase winning ties,
/// which approximates the store's Unicode collation for the ASCII
/// identifiers and lane labels the service queries by.
pub fn collate(left: &Value, right: &Value) -> Ordering {
    match type_rank(left).cmp(&type_rank(right)) {
        Ordering::Equal => {}
        unequal => return unequal,
    }
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => collate_str(a, b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match collate(x, y) {
                    Ordering::Equal => {}
                    unequal => return unequal,
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                match collate_str(ka, kb).then_with(|| collate(va, vb)) {
                    Ordering::Equal => {}
                    unequal => return unequal,
                }
            }
            a.len().cmp(&b.len())
        }
        _ => Ordering::Equal,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

fn collate_str(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    // Lowercase sorts before uppercase at the first differing character.
    folded.then_with(|| b.cmp(a))
}
