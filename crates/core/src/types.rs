//! The type system used to describe attribute values on the wire
//!
//! Types are exchanged with the host as JSON documents: primitive types are plain strings
//! (`"string"`, `"number"`, `"bool"`, `"dynamic"`) and collection or structural types are two
//! element arrays such as `["list","string"]` or `["object",{"name":"string"}]`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::error::CodecError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Type {
    Bool,
    Number,
    String,
    /// A value whose concrete type is only known at runtime and travels alongside the value
    #[default]
    Dynamic,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Object(BTreeMap<String, Type>),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn list(element: Type) -> Self {
        Self::List(Box::new(element))
    }

    pub fn set(element: Type) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn map(element: Type) -> Self {
        Self::Map(Box::new(element))
    }

    pub fn object<I, K>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, Type)>,
        K: Into<String>,
    {
        Self::Object(
            attributes
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        )
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Bool | Self::Number | Self::String)
    }

    /// Element type of a list, set or map
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Self::List(ty) | Self::Set(ty) | Self::Map(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn attribute_type(&self, name: &str) -> Option<&Type> {
        match self {
            Self::Object(attributes) => attributes.get(name),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool => json!("bool"),
            Self::Number => json!("number"),
            Self::String => json!("string"),
            Self::Dynamic => json!("dynamic"),
            Self::List(ty) => json!(["list", ty.to_json()]),
            Self::Set(ty) => json!(["set", ty.to_json()]),
            Self::Map(ty) => json!(["map", ty.to_json()]),
            Self::Object(attributes) => {
                let attributes: serde_json::Map<_, _> = attributes
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.to_json()))
                    .collect();
                json!(["object", attributes])
            }
            Self::Tuple(elements) => {
                let elements: Vec<_> = elements.iter().map(Type::to_json).collect();
                json!(["tuple", elements])
            }
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, CodecError> {
        match value {
            serde_json::Value::String(s) => match s.as_str() {
                "bool" => Ok(Self::Bool),
                "number" => Ok(Self::Number),
                "string" => Ok(Self::String),
                "dynamic" => Ok(Self::Dynamic),
                other => Err(CodecError::InvalidType(format!(
                    "unknown primitive type {other:?}"
                ))),
            },
            serde_json::Value::Array(parts) => {
                let (kind, rest) = parts
                    .split_first()
                    .ok_or_else(|| CodecError::InvalidType("empty type array".to_string()))?;
                let kind = kind.as_str().ok_or_else(|| {
                    CodecError::InvalidType("type kind must be a string".to_string())
                })?;
                // objects may carry a trailing list of optional attributes
                let inner = rest.first().ok_or_else(|| {
                    CodecError::InvalidType(format!("{kind} type is missing its element type"))
                })?;
                match kind {
                    "list" => Ok(Self::list(Self::from_json(inner)?)),
                    "set" => Ok(Self::set(Self::from_json(inner)?)),
                    "map" => Ok(Self::map(Self::from_json(inner)?)),
                    "object" => {
                        let attributes = inner.as_object().ok_or_else(|| {
                            CodecError::InvalidType("object attributes must be a map".to_string())
                        })?;
                        attributes
                            .iter()
                            .map(|(name, ty)| Ok((name.clone(), Self::from_json(ty)?)))
                            .collect::<Result<BTreeMap<_, _>, CodecError>>()
                            .map(Self::Object)
                    }
                    "tuple" => {
                        let elements = inner.as_array().ok_or_else(|| {
                            CodecError::InvalidType("tuple elements must be a list".to_string())
                        })?;
                        elements
                            .iter()
                            .map(Self::from_json)
                            .collect::<Result<Vec<_>, _>>()
                            .map(Self::Tuple)
                    }
                    other => Err(CodecError::InvalidType(format!("unknown type kind {other:?}"))),
                }
            }
            other => Err(CodecError::InvalidType(format!(
                "unexpected type document {other}"
            ))),
        }
    }

    /// Serialized JSON form as carried in schema `type` fields
    pub fn to_json_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_json(&value)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Dynamic => f.write_str("dynamic"),
            Self::List(ty) => write!(f, "list({ty})"),
            Self::Set(ty) => write!(f, "set({ty})"),
            Self::Map(ty) => write!(f, "map({ty})"),
            Self::Object(_) => f.write_str("object"),
            Self::Tuple(_) => f.write_str("tuple"),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_types_are_plain_strings() {
        assert_eq!(Type::String.to_json_bytes(), br#""string""#.to_vec());
        assert_eq!(Type::from_json_bytes(br#""bool""#).unwrap(), Type::Bool);
    }

    #[test]
    fn nested_types_parse() {
        let ty = Type::from_json_bytes(
            br#"["object",{"tags":["map","string"],"ports":["list","number"]}]"#,
        )
        .unwrap();
        assert_eq!(
            ty,
            Type::object([
                ("ports", Type::list(Type::Number)),
                ("tags", Type::map(Type::String)),
            ])
        );
        assert_eq!(Type::from_json(&ty.to_json()).unwrap(), ty);
    }

    #[test]
    fn optional_attribute_list_is_ignored() {
        let ty = Type::from_json_bytes(br#"["object",{"a":"string"},["a"]]"#).unwrap();
        assert_eq!(ty.attribute_type("a"), Some(&Type::String));
    }

    #[test]
    fn rejects_unknown_kinds() {
        assert!(Type::from_json_bytes(br#""float""#).is_err());
        assert!(Type::from_json_bytes(br#"["vector","string"]"#).is_err());
        assert!(Type::from_json_bytes(br#"[]"#).is_err());
    }
}
