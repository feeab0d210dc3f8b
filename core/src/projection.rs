//! Projection of tool-call results by dotted field paths.
//!
//! Each path is applied to the JSON content of a response; nested shape is
//! preserved, arrays are projected element-wise, and keys absent in the
//! source simply produce no entry. Multiple paths merge into one object.

use serde_json::Value;

/// Apply a set of dotted paths to `value` and merge the results.
pub fn project_value(value: &Value, picks: &[String]) -> Value {
    let mut merged = Value::Null;
    for pick in picks {
        let segments: Vec<&str> = pick.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        if let Some(projected) = project_path(value, &segments) {
            deep_merge(&mut merged, projected);
        }
    }
    if merged.is_null() {
        // No path matched; mirror the source's outer shape.
        match value {
            Value::Array(_) => Value::Array(Vec::new()),
            _ => Value::Object(serde_json::Map::new()),
        }
    } else {
        merged
    }
}

fn project_path(value: &Value, segments: &[&str]) -> Option<Value> {
    if segments.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => {
            let key = segments[0];
            let child = map.get(key)?;
            let projected = project_path(child, &segments[1..])?;
            let mut out = serde_json::Map::new();
            out.insert(key.to_string(), projected);
            Some(Value::Object(out))
        }
        Value::Array(items) => {
            let projected: Vec<Value> = items
                .iter()
                .filter_map(|item| project_path(item, segments))
                .collect();
            Some(Value::Array(projected))
        }
        _ => None,
    }
}

fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match target_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target_items), Value::Array(incoming_items)) => {
            for (index, value) in incoming_items.into_iter().enumerate() {
                match target_items.get_mut(index) {
                    Some(existing) => deep_merge(existing, value),
                    None => target_items.push(value),
                }
            }
        }
        (target_slot, incoming_value) => {
            if target_slot.is_null() {
                *target_slot = incoming_value;
            }
        }
    }
}
