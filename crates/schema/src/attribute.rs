use core::fmt;

use std::sync::Arc;

use tfplugin_core::{Attribute, Type, Value};

/// Checks a known, non-null configuration value. The error message is shown to the user.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Describes one attribute of a provider, resource or data source block
#[derive(Clone, Default)]
pub struct AttributeSchema {
    pub r#type: Type,
    pub description: String,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    /// A change to this attribute can only be applied by replacing the resource
    pub force_new: bool,
    /// Used when the configuration leaves the attribute unset
    pub default: Option<Value>,
    /// Warning shown when the attribute is configured
    pub deprecated: Option<String>,
    pub validator: Option<Validator>,
}

impl AttributeSchema {
    pub fn new(r#type: Type) -> Self {
        Self {
            r#type,
            ..Default::default()
        }
    }

    pub fn string() -> Self {
        Self::new(Type::String)
    }

    pub fn bool() -> Self {
        Self::new(Type::Bool)
    }

    pub fn number() -> Self {
        Self::new(Type::Number)
    }

    pub fn list(element: Type) -> Self {
        Self::new(Type::list(element))
    }

    pub fn set(element: Type) -> Self {
        Self::new(Type::set(element))
    }

    pub fn map(element: Type) -> Self {
        Self::new(Type::map(element))
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self.required = false;
        self
    }

    #[must_use]
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    #[must_use]
    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Sets a default, which makes the attribute optional. The host only accepts a planned value
    /// for an unset attribute when it is computed, so it is marked computed as well.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self.computed = true;
        self.optional()
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    #[must_use]
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Set only by the provider
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    pub(crate) fn to_core(&self) -> Attribute {
        Attribute {
            r#type: self.r#type.clone(),
            description: self.description.clone(),
            required: self.required,
            optional: self.optional,
            computed: self.computed,
            sensitive: self.sensitive,
            deprecated: self.deprecated.is_some(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for AttributeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSchema")
            .field("type", &self.r#type)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field("sensitive", &self.sensitive)
            .field("force_new", &self.force_new)
            .field("default", &self.default)
            .field("deprecated", &self.deprecated)
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_makes_attribute_optional_and_computed() {
        let attr = AttributeSchema::string().required().with_default("0644");
        assert!(attr.optional);
        assert!(!attr.required);
        assert!(attr.computed);
        assert!(!attr.is_computed_only());
        assert_eq!(attr.default, Some(Value::string("0644")));
    }

    #[test]
    fn core_attribute_mirrors_flags() {
        let attr = AttributeSchema::string()
            .computed()
            .sensitive()
            .deprecated("use content instead")
            .description("digest")
            .to_core();
        assert!(attr.computed);
        assert!(attr.sensitive);
        assert!(attr.deprecated);
        assert_eq!(attr.description, "digest");
        assert_eq!(attr.r#type, Type::String);
    }

    #[test]
    fn validators_see_values() {
        let attr = AttributeSchema::number().validator(|v| match v.as_i64() {
            Some(n) if n > 0 => Ok(()),
            _ => Err("must be positive".to_string()),
        });
        let validator = attr.validator.unwrap();
        assert!(validator(&Value::from(3)).is_ok());
        assert_eq!(validator(&Value::from(-1)).unwrap_err(), "must be positive");
    }
}
