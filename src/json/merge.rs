use serde_json::Value;

use super::path::MERGE_KEY;

/// Apply a structural merge patch
///
/// Behaves like a [JSON merge patch](https://datatracker.ietf.org/doc/html/rfc7386) (maps
/// are merged recursively, `null` removes a field) except for lists of named elements:
/// when every element of both the patch list and the target list is a map carrying a
/// `name`, elements are merged by name instead of replacing the whole list. This is the
/// merge strategy the cluster uses for containers, environment variables, ports and
/// volumes.
pub fn strategic_merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(obj) = target {
                for (key, value) in fields {
                    if value.is_null() {
                        obj.remove(key);
                    } else {
                        strategic_merge(obj.entry(key.as_str()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        Value::Array(items) if !items.is_empty() && is_named_list(items) => match target {
            Value::Array(existing) if is_named_list(existing) => {
                for item in items {
                    let name = item.get(MERGE_KEY);
                    match existing.iter_mut().find(|e| e.get(MERGE_KEY) == name) {
                        Some(found) => strategic_merge(found, item),
                        None => existing.push(item.clone()),
                    }
                }
            }
            _ => *target = patch.clone(),
        },
        _ => *target = patch.clone(),
    }
}

fn is_named_list(items: &[Value]) -> bool {
    items
        .iter()
        .all(|item| item.get(MERGE_KEY).is_some_and(Value::is_string))
}
