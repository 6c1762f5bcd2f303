//! The attribute values an operation reads and writes

use std::collections::BTreeMap;

use tfplugin_core::{Diagnostic, Diagnostics, Value};

pub const ID_ATTRIBUTE: &str = "id";

/// Attribute values of a single resource, data source or provider configuration.
///
/// Holds the values an operation starts from (configuration, plan or state) and, for updates, the
/// prior state to detect changes against. Unset attributes read as null.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceData {
    values: BTreeMap<String, Value>,
    prior: Option<BTreeMap<String, Value>>,
    warnings: Diagnostics,
}

fn into_attributes(value: Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(attributes) => attributes,
        _ => BTreeMap::new(),
    }
}

impl ResourceData {
    /// Starts from an object value; anything else yields no attributes
    pub fn new(value: Value) -> Self {
        Self {
            values: into_attributes(value),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_prior(mut self, prior: Value) -> Self {
        self.prior = Some(into_attributes(prior));
        self
    }

    pub fn get(&self, name: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.values.get(name).unwrap_or(NULL)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).as_str()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).as_bool()
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).as_i64()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).as_f64()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// The value from the prior state, null when there is none
    pub fn prior(&self, name: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.prior
            .as_ref()
            .and_then(|prior| prior.get(name))
            .unwrap_or(NULL)
    }

    /// True when the attribute differs from the prior state, or there is no prior state
    pub fn has_change(&self, name: &str) -> bool {
        self.prior.is_none() || self.get(name) != self.prior(name)
    }

    /// The object's ID; `None` while unknown, null or empty
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_ATTRIBUTE).filter(|id| !id.is_empty())
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.set(ID_ATTRIBUTE, id.into());
    }

    /// Marks the object as gone
    pub fn clear_id(&mut self) {
        self.set(ID_ATTRIBUTE, Value::Null);
    }

    /// Adds a warning shown alongside the operation's result
    pub fn warn(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.warnings.push(Diagnostic::warning(summary, detail));
    }

    pub(crate) fn take_warnings(&mut self) -> Diagnostics {
        std::mem::take(&mut self.warnings)
    }

    /// Builds the object for `names`, the block's attributes. Unknown values are kept; attributes
    /// outside the block are dropped.
    pub(crate) fn to_value<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Value {
        Value::Object(
            names
                .into_iter()
                .map(|name| (name.clone(), self.get(name).clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> Value {
        Value::object([
            ("id", Value::string(path)),
            ("path", Value::string(path)),
            ("content", Value::string(content)),
        ])
    }

    #[test]
    fn getters_default_to_null() {
        let data = ResourceData::new(file("a.txt", "hello"));
        assert_eq!(data.get_str("content"), Some("hello"));
        assert_eq!(data.get("missing"), &Value::Null);
        assert_eq!(data.get_bool("content"), None);
        assert_eq!(ResourceData::new(Value::Null).get("path"), &Value::Null);
    }

    #[test]
    fn changes_are_detected_against_prior_state() {
        let data = ResourceData::new(file("a.txt", "new")).with_prior(file("a.txt", "old"));
        assert!(data.has_change("content"));
        assert!(!data.has_change("path"));
        assert_eq!(data.prior("content"), &Value::string("old"));

        let created = ResourceData::new(file("a.txt", "new"));
        assert!(created.has_change("path"));
        assert_eq!(created.prior("path"), &Value::Null);
    }

    #[test]
    fn id_lifecycle() {
        let mut data = ResourceData::new(Value::object([("id", Value::Unknown)]));
        assert_eq!(data.id(), None);
        data.set_id("a.txt");
        assert_eq!(data.id(), Some("a.txt"));
        data.clear_id();
        assert_eq!(data.id(), None);
        data.set_id("");
        assert_eq!(data.id(), None);
    }

    #[test]
    fn to_value_keeps_only_block_attributes() {
        let mut data = ResourceData::new(file("a.txt", "hello"));
        data.set("stray", true);
        data.warn("careful", "");
        let names = ["content".to_string(), "id".to_string(), "mode".to_string()];
        assert_eq!(
            data.to_value(&names),
            Value::object([
                ("content", Value::string("hello")),
                ("id", Value::string("a.txt")),
                ("mode", Value::Null),
            ])
        );
        assert_eq!(data.take_warnings().len(), 1);
        assert!(data.take_warnings().is_empty());
    }
}
