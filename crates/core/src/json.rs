//! JSON decoding of values
//!
//! The host sends JSON for values it has no msgpack encoding for, most notably raw resource state
//! persisted by earlier versions of a provider. JSON cannot represent unknown values.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::error::CodecError;
use crate::path::AttributePath;
use crate::types::Type;
use crate::value::Value;

/// Decodes `bytes` as a value conforming to `ty`, rejecting attributes that `ty` does not declare
pub fn decode(bytes: &[u8], ty: &Type) -> Result<Value, CodecError> {
    let raw: Json = serde_json::from_slice(bytes)?;
    from_json(raw, ty, &AttributePath::root(), false)
}

/// Like [`decode`], but silently drops object attributes that `ty` does not declare.
///
/// Used for previously persisted state, which may still hold attributes removed from a schema.
pub fn decode_lenient(bytes: &[u8], ty: &Type) -> Result<Value, CodecError> {
    let raw: Json = serde_json::from_slice(bytes)?;
    from_json(raw, ty, &AttributePath::root(), true)
}

fn mismatch(path: &AttributePath, expected: &Type, found: &Json) -> CodecError {
    let found = match found {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    };
    CodecError::Mismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn from_json(
    raw: Json,
    ty: &Type,
    path: &AttributePath,
    lenient: bool,
) -> Result<Value, CodecError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match (ty, raw) {
        (Type::Bool, Json::Bool(b)) => Ok(Value::Bool(b)),
        (Type::Bool, Json::String(s)) if s == "true" || s == "false" => {
            Ok(Value::Bool(s == "true"))
        }
        (Type::Number, Json::Number(n)) => Ok(Value::Number(n)),
        (Type::Number, Json::String(s)) => serde_json::from_str(&s)
            .map(Value::Number)
            .map_err(|_| mismatch(path, ty, &Json::String(s))),
        (Type::String, Json::String(s)) => Ok(Value::String(s)),
        // primitive values are converted to strings the same way configuration would be
        (Type::String, Json::Number(n)) => Ok(Value::String(n.to_string())),
        (Type::String, Json::Bool(b)) => Ok(Value::String(b.to_string())),
        (Type::List(element) | Type::Set(element), Json::Array(items)) => {
            let items = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| from_json(item, element, &path.clone().index(i as i64), lenient))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if matches!(ty, Type::List(_)) {
                Value::List(items)
            } else {
                Value::Set(items)
            })
        }
        (Type::Tuple(elements), Json::Array(items)) if elements.len() == items.len() => items
            .into_iter()
            .zip(elements)
            .enumerate()
            .map(|(i, (item, ty))| from_json(item, ty, &path.clone().index(i as i64), lenient))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Tuple),
        (Type::Map(element), Json::Object(entries)) => entries
            .into_iter()
            .map(|(key, item)| {
                let value = from_json(item, element, &path.clone().key(key.clone()), lenient)?;
                Ok((key, value))
            })
            .collect::<Result<BTreeMap<_, _>, CodecError>>()
            .map(Value::Map),
        (Type::Object(attributes), Json::Object(entries)) => {
            let mut decoded: BTreeMap<String, Value> = attributes
                .keys()
                .map(|name| (name.clone(), Value::Null))
                .collect();
            for (name, item) in entries {
                match attributes.get(&name) {
                    Some(attr_ty) => {
                        let attr_path = path.clone().attr(name.clone());
                        let value = from_json(item, attr_ty, &attr_path, lenient)?;
                        decoded.insert(name, value);
                    }
                    None if lenient => {}
                    None => {
                        return Err(CodecError::UnexpectedAttribute {
                            path: path.to_string(),
                            name,
                        })
                    }
                }
            }
            Ok(Value::Object(decoded))
        }
        (Type::Dynamic, Json::Object(mut entries)) => {
            let concrete = entries
                .remove("type")
                .ok_or_else(|| CodecError::Mismatch {
                    path: path.to_string(),
                    expected: "{\"value\",\"type\"} object".to_string(),
                    found: "object without type".to_string(),
                })
                .and_then(|ty| Type::from_json(&ty))?;
            let value = entries.remove("value").unwrap_or(Json::Null);
            from_json(value, &concrete, path, lenient)
        }
        (ty, raw) => Err(mismatch(path, ty, &raw)),
    }
}
