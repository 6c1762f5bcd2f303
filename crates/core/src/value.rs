//! Dynamically typed attribute values
//!
//! Values are not self-describing: the [`Type`] they conform to always comes from a schema, which
//! is why decoding and encoding (see [`crate::msgpack`] and [`crate::json`]) take a type argument.

use std::collections::BTreeMap;

use serde_json::Number;

use crate::types::Type;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    /// A value that will only be known after apply
    Unknown,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn object<I, K>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Object(
            attributes
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Builds an object with every attribute of `ty` set to null
    pub fn null_object(ty: &Type) -> Self {
        match ty {
            Type::Object(attributes) => {
                Self::object(attributes.keys().map(|name| (name.clone(), Self::Null)))
            }
            _ => Self::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Returns true if neither this value nor any nested value is unknown
    pub fn is_wholly_known(&self) -> bool {
        match self {
            Self::Unknown => false,
            Self::List(items) | Self::Set(items) | Self::Tuple(items) => {
                items.iter().all(Value::is_wholly_known)
            }
            Self::Map(items) | Self::Object(items) => items.values().all(Value::is_wholly_known),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(attributes) => Some(attributes),
            _ => None,
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|attributes| attributes.get(name))
    }

    /// Replaces every unknown value, at any depth, with null
    pub fn unknown_as_null(self) -> Self {
        match self {
            Self::Unknown => Self::Null,
            Self::List(items) => {
                Self::List(items.into_iter().map(Value::unknown_as_null).collect())
            }
            Self::Set(items) => Self::Set(items.into_iter().map(Value::unknown_as_null).collect()),
            Self::Tuple(items) => {
                Self::Tuple(items.into_iter().map(Value::unknown_as_null).collect())
            }
            Self::Map(items) => Self::Map(
                items
                    .into_iter()
                    .map(|(k, v)| (k, v.unknown_as_null()))
                    .collect(),
            ),
            Self::Object(items) => Self::Object(
                items
                    .into_iter()
                    .map(|(k, v)| (k, v.unknown_as_null()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Best effort type for values of dynamic attributes, which must carry their type on the wire
    pub fn implied_type(&self) -> Type {
        match self {
            Self::Null | Self::Unknown => Type::Dynamic,
            Self::Bool(_) => Type::Bool,
            Self::Number(_) => Type::Number,
            Self::String(_) => Type::String,
            Self::List(items) => Type::list(common_element_type(items)),
            Self::Set(items) => Type::set(common_element_type(items)),
            Self::Map(items) => Type::map(common_element_type(items.values())),
            Self::Object(attributes) => Type::Object(
                attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), value.implied_type()))
                    .collect(),
            ),
            Self::Tuple(items) => Type::Tuple(items.iter().map(Value::implied_type).collect()),
        }
    }
}

fn common_element_type<'a>(items: impl IntoIterator<Item = &'a Value>) -> Type {
    let mut types = items
        .into_iter()
        .filter(|v| v.is_known() && !v.is_null())
        .map(Value::implied_type);
    match types.next() {
        Some(first) if types.all(|ty| ty == first) => first,
        _ => Type::Dynamic,
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
