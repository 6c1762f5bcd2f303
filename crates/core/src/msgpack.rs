//! MessagePack encoding of values, the preferred representation for values exchanged with the host
//!
//! Unknown values are encoded as extension type 0. Values of dynamic type are encoded as a two
//! element array holding the JSON type document followed by the value itself.

use std::collections::BTreeMap;

use rmpv::Value as Msgpack;
use serde_json::Number;

use crate::error::CodecError;
use crate::path::AttributePath;
use crate::types::Type;
use crate::value::Value;

const UNKNOWN_EXT: i8 = 0;
/// Unknown values refined with extra constraints by newer hosts
const REFINED_UNKNOWN_EXT: i8 = 12;

/// Decodes `bytes` as a value conforming to `ty`
pub fn decode(bytes: &[u8], ty: &Type) -> Result<Value, CodecError> {
    let mut reader = bytes;
    let raw = rmpv::decode::read_value(&mut reader)
        .map_err(|e| CodecError::MsgpackDecode(e.to_string()))?;
    from_msgpack(raw, ty, &AttributePath::root())
}

/// Encodes `value` against `ty`
pub fn encode(value: &Value, ty: &Type) -> Result<Vec<u8>, CodecError> {
    let raw = to_msgpack(value, ty, &AttributePath::root())?;
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &raw)
        .map_err(|e| CodecError::MsgpackEncode(e.to_string()))?;
    Ok(buf)
}

fn mismatch(path: &AttributePath, expected: &Type, found: &Msgpack) -> CodecError {
    CodecError::Mismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: describe(found).to_string(),
    }
}

fn describe(raw: &Msgpack) -> &'static str {
    match raw {
        Msgpack::Nil => "nil",
        Msgpack::Boolean(_) => "bool",
        Msgpack::Integer(_) | Msgpack::F32(_) | Msgpack::F64(_) => "number",
        Msgpack::String(_) => "string",
        Msgpack::Binary(_) => "binary",
        Msgpack::Array(_) => "array",
        Msgpack::Map(_) => "map",
        Msgpack::Ext(..) => "extension",
    }
}

fn from_msgpack(raw: Msgpack, ty: &Type, path: &AttributePath) -> Result<Value, CodecError> {
    match raw {
        Msgpack::Nil => return Ok(Value::Null),
        Msgpack::Ext(UNKNOWN_EXT | REFINED_UNKNOWN_EXT, _) => return Ok(Value::Unknown),
        _ => {}
    }
    match ty {
        Type::Bool => match raw {
            Msgpack::Boolean(b) => Ok(Value::Bool(b)),
            other => Err(mismatch(path, ty, &other)),
        },
        Type::Number => decode_number(raw, path),
        Type::String => match raw {
            Msgpack::String(s) => s
                .into_str()
                .map(Value::String)
                .ok_or_else(|| CodecError::Mismatch {
                    path: path.to_string(),
                    expected: "string".to_string(),
                    found: "invalid utf-8".to_string(),
                }),
            other => Err(mismatch(path, ty, &other)),
        },
        Type::List(element) | Type::Set(element) => {
            let Msgpack::Array(items) = raw else {
                return Err(mismatch(path, ty, &raw));
            };
            let items = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| from_msgpack(item, element, &path.clone().index(i as i64)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if matches!(ty, Type::List(_)) {
                Value::List(items)
            } else {
                Value::Set(items)
            })
        }
        Type::Tuple(elements) => {
            let Msgpack::Array(items) = raw else {
                return Err(mismatch(path, ty, &raw));
            };
            if items.len() != elements.len() {
                return Err(CodecError::Mismatch {
                    path: path.to_string(),
                    expected: format!("tuple of {} elements", elements.len()),
                    found: format!("{} elements", items.len()),
                });
            }
            items
                .into_iter()
                .zip(elements)
                .enumerate()
                .map(|(i, (item, ty))| from_msgpack(item, ty, &path.clone().index(i as i64)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        Type::Map(element) => {
            let Msgpack::Map(entries) = raw else {
                return Err(mismatch(path, ty, &raw));
            };
            let mut items = BTreeMap::new();
            for (key, item) in entries {
                let key = map_key(key, path)?;
                let value = from_msgpack(item, element, &path.clone().key(key.clone()))?;
                items.insert(key, value);
            }
            Ok(Value::Map(items))
        }
        Type::Object(attributes) => {
            let Msgpack::Map(entries) = raw else {
                return Err(mismatch(path, ty, &raw));
            };
            let mut decoded: BTreeMap<String, Value> = attributes
                .keys()
                .map(|name| (name.clone(), Value::Null))
                .collect();
            for (key, item) in entries {
                let name = map_key(key, path)?;
                let Some(attr_ty) = attributes.get(&name) else {
                    return Err(CodecError::UnexpectedAttribute {
                        path: path.to_string(),
                        name,
                    });
                };
                let value = from_msgpack(item, attr_ty, &path.clone().attr(name.clone()))?;
                decoded.insert(name, value);
            }
            Ok(Value::Object(decoded))
        }
        Type::Dynamic => {
            let Msgpack::Array(parts) = raw else {
                return Err(mismatch(path, ty, &raw));
            };
            let [type_part, value] = <[Msgpack; 2]>::try_from(parts).map_err(|parts| {
                CodecError::Mismatch {
                    path: path.to_string(),
                    expected: "[type, value] pair".to_string(),
                    found: format!("{} elements", parts.len()),
                }
            })?;
            let concrete = match type_part {
                Msgpack::Binary(bytes) => Type::from_json_bytes(&bytes)?,
                Msgpack::String(s) => Type::from_json_bytes(s.as_bytes())?,
                other => return Err(mismatch(path, &Type::String, &other)),
            };
            from_msgpack(value, &concrete, path)
        }
    }
}

fn map_key(key: Msgpack, path: &AttributePath) -> Result<String, CodecError> {
    match key {
        Msgpack::String(s) => s.into_str().ok_or_else(|| CodecError::Mismatch {
            path: path.to_string(),
            expected: "string key".to_string(),
            found: "invalid utf-8".to_string(),
        }),
        other => Err(mismatch(path, &Type::String, &other)),
    }
}

fn decode_number(raw: Msgpack, path: &AttributePath) -> Result<Value, CodecError> {
    let number = match &raw {
        Msgpack::Integer(i) => i
            .as_i64()
            .map(Number::from)
            .or_else(|| i.as_u64().map(Number::from)),
        Msgpack::F64(f) => Number::from_f64(*f),
        Msgpack::F32(f) => Number::from_f64(f64::from(*f)),
        // numbers that do not fit in 64 bits travel as strings
        Msgpack::String(s) => s.as_str().and_then(|s| serde_json::from_str::<Number>(s).ok()),
        _ => None,
    };
    number
        .map(Value::Number)
        .ok_or_else(|| mismatch(path, &Type::Number, &raw))
}

fn value_mismatch(path: &AttributePath, expected: &Type, found: &Value) -> CodecError {
    CodecError::Mismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: found.implied_type().to_string(),
    }
}

fn to_msgpack(value: &Value, ty: &Type, path: &AttributePath) -> Result<Msgpack, CodecError> {
    match value {
        Value::Unknown => return Ok(Msgpack::Ext(UNKNOWN_EXT, vec![0])),
        Value::Null => return Ok(Msgpack::Nil),
        _ => {}
    }
    match (ty, value) {
        (Type::Bool, Value::Bool(b)) => Ok(Msgpack::Boolean(*b)),
        (Type::Number, Value::Number(n)) => Ok(if let Some(i) = n.as_i64() {
            Msgpack::from(i)
        } else if let Some(u) = n.as_u64() {
            Msgpack::from(u)
        } else {
            Msgpack::F64(n.as_f64().unwrap_or_default())
        }),
        (Type::String, Value::String(s)) => Ok(Msgpack::from(s.as_str())),
        (Type::List(element), Value::List(items)) | (Type::Set(element), Value::Set(items)) => {
            items
                .iter()
                .enumerate()
                .map(|(i, item)| to_msgpack(item, element, &path.clone().index(i as i64)))
                .collect::<Result<Vec<_>, _>>()
                .map(Msgpack::Array)
        }
        (Type::Tuple(elements), Value::Tuple(items)) if elements.len() == items.len() => items
            .iter()
            .zip(elements)
            .enumerate()
            .map(|(i, (item, ty))| to_msgpack(item, ty, &path.clone().index(i as i64)))
            .collect::<Result<Vec<_>, _>>()
            .map(Msgpack::Array),
        (Type::Map(element), Value::Map(items)) => items
            .iter()
            .map(|(key, item)| {
                Ok((
                    Msgpack::from(key.as_str()),
                    to_msgpack(item, element, &path.clone().key(key.clone()))?,
                ))
            })
            .collect::<Result<Vec<_>, CodecError>>()
            .map(Msgpack::Map),
        (Type::Object(attributes), Value::Object(items)) => {
            if let Some(name) = items.keys().find(|name| !attributes.contains_key(*name)) {
                return Err(CodecError::UnexpectedAttribute {
                    path: path.to_string(),
                    name: name.clone(),
                });
            }
            attributes
                .iter()
                .map(|(name, attr_ty)| {
                    let item = items.get(name).unwrap_or(&Value::Null);
                    Ok((
                        Msgpack::from(name.as_str()),
                        to_msgpack(item, attr_ty, &path.clone().attr(name.clone()))?,
                    ))
                })
                .collect::<Result<Vec<_>, CodecError>>()
                .map(Msgpack::Map)
        }
        (Type::Dynamic, value) => {
            let concrete = value.implied_type();
            Ok(Msgpack::Array(vec![
                Msgpack::Binary(concrete.to_json_bytes()),
                to_msgpack(value, &concrete, path)?,
            ]))
        }
        (ty, value) => Err(value_mismatch(path, ty, value)),
    }
}
