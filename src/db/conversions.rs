//! Attribute conversion functions.
//!
//! Pure functions for converting between store attribute maps and JSON
//! documents. These are testable in isolation without store access.

use aws_sdk_dynamodb::types::AttributeValue;
use aws_smithy_types::Blob;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Number, Value};

use crate::db::models::{BatchKeys, Item};
use crate::error::ConversionError;

/// Convert a JSON value to a store attribute.
///
/// Numbers keep their JSON text so no precision is lost on the way in.
pub fn attribute_from_json(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s),
        Value::Array(values) => {
            AttributeValue::L(values.into_iter().map(attribute_from_json).collect())
        }
        Value::Object(map) => AttributeValue::M(
            map.into_iter()
                .map(|(name, value)| (name, attribute_from_json(value)))
                .collect(),
        ),
    }
}

/// Convert a JSON object to an item (or key).
pub fn item_from_json(value: Value) -> Result<Item, ConversionError> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(name, value)| (name, attribute_from_json(value)))
            .collect()),
        other => Err(ConversionError::NotAnObject(json_kind(&other))),
    }
}

/// Parse a JSON object string into an item (or key).
pub fn item_from_str(json: &str) -> Result<Item, ConversionError> {
    item_from_json(serde_json::from_str(json)?)
}

/// Convert a store attribute to JSON.
///
/// Binary values become base64 strings; sets become arrays.
pub fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(values) => Value::Array(values.iter().map(attribute_to_json).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(name, value)| (name.clone(), attribute_to_json(value)))
                .collect(),
        ),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(values) => Value::Array(values.iter().map(|n| number_to_json(n)).collect()),
        AttributeValue::B(blob) => Value::String(BASE64.encode(blob.as_ref())),
        AttributeValue::Bs(blobs) => Value::Array(
            blobs
                .iter()
                .map(|blob| Value::String(BASE64.encode(blob.as_ref())))
                .collect(),
        ),
        _ => Value::Null,
    }
}

/// Convert an item (or key) to a JSON object.
pub fn item_to_json(item: &Item) -> Value {
    let map: Map<String, Value> = item
        .iter()
        .map(|(name, value)| (name.clone(), attribute_to_json(value)))
        .collect();
    Value::Object(map)
}

/// Binary attribute from base64 text
pub fn binary_from_base64(encoded: &str) -> Result<AttributeValue, base64::DecodeError> {
    Ok(AttributeValue::B(Blob::new(BASE64.decode(encoded)?)))
}

/// Compact, stable rendering of a key for log lines and error messages
pub fn describe_key(key: &Item) -> String {
    item_to_json(key).to_string()
}

/// Compact rendering of a batch request, tables and keys in sorted order
pub fn describe_batch_keys(keys: &BatchKeys) -> String {
    let tables: Map<String, Value> = keys
        .iter()
        .map(|(table, keys)| {
            let mut rendered: Vec<Value> = keys.iter().map(item_to_json).collect();
            rendered.sort_by_cached_key(|key| key.to_string());
            (table.clone(), Value::Array(rendered))
        })
        .collect();
    Value::Object(tables).to_string()
}

fn number_to_json(n: &str) -> Value {
    if let Ok(i) = n.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(u) = n.parse::<u64>() {
        return Value::Number(u.into());
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(n.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
