//! Mapping between value trees and JSON documents.
//!
//! JSON objects have no room for a scalar next to their fields, so a value
//! that has both stores its scalar under the `$` key. JSON arrays nested in
//! arrays have no field name either; they live under the `_` key. A value
//! whose only content is a `_` vector renders as that bare array.

use serde_json::{Map, Number, Value as JsonValue};

use crate::value::{Scalar, Value, ValueVector};

/// Object key holding the scalar of a value that also has children
pub const ROOT_SIGN: &str = "$";

/// Field name of a vector rendered as a bare JSON array
pub const ARRAY_KEY: &str = "_";

/// Render a value tree as JSON
pub fn value_to_json(value: &Value) -> JsonValue {
    if !value.is_defined() && value.children().len() == 1 {
        if let Some(items) = value.children_of(ARRAY_KEY) {
            return vector_to_json(items, true);
        }
    }

    if !value.has_any_children() {
        return scalar_to_json(value.scalar());
    }

    let mut object = Map::new();
    if value.is_defined() {
        object.insert(ROOT_SIGN.to_string(), scalar_to_json(value.scalar()));
    }
    for (name, vector) in value.children() {
        object.insert(name.clone(), vector_to_json(vector, false));
    }
    JsonValue::Object(object)
}

/// A single element renders as itself, anything else (including nothing) as
/// an array
fn vector_to_json(vector: &ValueVector, force_array: bool) -> JsonValue {
    match vector.first() {
        Some(only) if !force_array && vector.len() == 1 => value_to_json(only),
        _ => JsonValue::Array(vector.iter().map(value_to_json).collect()),
    }
}

fn scalar_to_json(scalar: &Scalar) -> JsonValue {
    match scalar {
        Scalar::Undefined => JsonValue::Null,
        Scalar::String(s) => JsonValue::String(s.clone()),
        Scalar::Int32(i) => JsonValue::from(*i),
        Scalar::Int64(l) => JsonValue::from(*l),
        // NaN and infinities have no JSON form
        Scalar::Double(d) => Number::from_f64(*d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Scalar::Bool(b) => JsonValue::Bool(*b),
        Scalar::ByteArray(b) => JsonValue::String(b.to_string_lossy().into_owned()),
    }
}

/// Build a value tree from JSON
pub fn json_to_value(json: &JsonValue) -> Value {
    match json {
        JsonValue::Array(items) => {
            let mut value = Value::new();
            value
                .children_mut()
                .insert(ARRAY_KEY.to_string(), array_to_vector(items));
            value
        }
        JsonValue::Object(map) => object_to_value(map),
        other => Value::with_scalar(json_to_scalar(other)),
    }
}

fn object_to_value(map: &Map<String, JsonValue>) -> Value {
    let mut value = Value::new();
    for (key, entry) in map {
        if key == ROOT_SIGN {
            value.set_value(json_to_scalar(entry));
        } else {
            value.children_mut().insert(key.clone(), json_to_vector(entry));
        }
    }
    value
}

fn json_to_vector(json: &JsonValue) -> ValueVector {
    match json {
        JsonValue::Array(items) => array_to_vector(items),
        JsonValue::Object(map) => ValueVector::from(vec![object_to_value(map)]),
        other => ValueVector::from(vec![Value::with_scalar(json_to_scalar(other))]),
    }
}

fn array_to_vector(items: &[JsonValue]) -> ValueVector {
    items.iter().map(json_to_value).collect()
}

fn json_to_scalar(json: &JsonValue) -> Scalar {
    match json {
        JsonValue::Null => Scalar::Undefined,
        JsonValue::Bool(b) => Scalar::Bool(*b),
        JsonValue::Number(n) => number_to_scalar(n),
        JsonValue::String(s) => Scalar::String(s.clone()),
        // only reachable through "$": keep the raw text
        other => Scalar::String(other.to_string()),
    }
}

fn number_to_scalar(n: &Number) -> Scalar {
    if let Some(l) = n.as_i64() {
        match i32::try_from(l) {
            Ok(i) => Scalar::Int32(i),
            Err(_) => Scalar::Int64(l),
        }
    } else {
        Scalar::Double(n.as_f64().unwrap_or(0.0))
    }
}
