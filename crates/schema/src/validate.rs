use std::collections::BTreeMap;

use tfplugin_core::{AttributePath, Diagnostic, Diagnostics, Value};

use crate::attribute::AttributeSchema;

/// Checks a configuration against its block: required attributes are set, computed-only ones are
/// not, and every known value passes its validator. Unknown values are only checked once known.
pub(crate) fn validate_config(
    attributes: &BTreeMap<String, AttributeSchema>,
    config: &Value,
) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    for (name, attr) in attributes {
        let value = config.get_attr(name).unwrap_or(&Value::Null);
        let path = AttributePath::attribute(name.as_str());
        if !value.is_known() {
            continue;
        }
        if value.is_null() {
            if attr.required {
                diagnostics.push(
                    Diagnostic::error(
                        "Missing required argument",
                        format!(
                            "The argument \"{name}\" is required, but no definition was found."
                        ),
                    )
                    .with_attribute(path),
                );
            }
            continue;
        }
        if attr.is_computed_only() {
            diagnostics.push(
                Diagnostic::error(
                    "Invalid configuration",
                    format!("\"{name}\": this field cannot be set"),
                )
                .with_attribute(path),
            );
            continue;
        }
        if let Some(message) = &attr.deprecated {
            diagnostics.push(
                Diagnostic::warning("Argument is deprecated", message.clone())
                    .with_attribute(path.clone()),
            );
        }
        if let Some(validator) = attr.validator.as_ref().filter(|_| value.is_wholly_known()) {
            if let Err(message) = validator(value) {
                diagnostics.push(
                    Diagnostic::error(format!("Invalid value for \"{name}\""), message)
                        .with_attribute(path),
                );
            }
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> BTreeMap<String, AttributeSchema> {
        BTreeMap::from([
            ("path".to_string(), AttributeSchema::string().required()),
            (
                "mode".to_string(),
                AttributeSchema::string()
                    .with_default("0644")
                    .validator(|v| match v.as_str() {
                        Some("0644" | "0600") => Ok(()),
                        _ => Err("unsupported mode".to_string()),
                    }),
            ),
            ("digest".to_string(), AttributeSchema::string().computed()),
            (
                "legacy".to_string(),
                AttributeSchema::bool().optional().deprecated("no longer used"),
            ),
        ])
    }

    fn diagnostic_summaries(diagnostics: &Diagnostics) -> Vec<&str> {
        diagnostics.iter().map(|d| d.summary.as_str()).collect()
    }

    #[test]
    fn valid_config_has_no_diagnostics() {
        let config = Value::object([("path", Value::string("a.txt"))]);
        assert!(validate_config(&attributes(), &config).is_empty());
    }

    #[test]
    fn missing_required_attribute_is_reported_with_path() {
        let diagnostics = validate_config(&attributes(), &Value::Null);
        assert_eq!(diagnostic_summaries(&diagnostics), ["Missing required argument"]);
        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.attribute, Some(AttributePath::attribute("path")));
    }

    #[test]
    fn computed_only_attributes_cannot_be_configured() {
        let config = Value::object([
            ("path", Value::string("a.txt")),
            ("digest", Value::string("abc")),
        ]);
        let diagnostics = validate_config(&attributes(), &config);
        assert_eq!(diagnostic_summaries(&diagnostics), ["Invalid configuration"]);
    }

    #[test]
    fn validators_and_deprecations_apply_to_known_values() {
        let config = Value::object([
            ("path", Value::string("a.txt")),
            ("mode", Value::string("0777")),
            ("legacy", Value::Bool(true)),
        ]);
        let diagnostics = validate_config(&attributes(), &config);
        assert!(diagnostics.has_errors());
        assert_eq!(
            diagnostic_summaries(&diagnostics),
            ["Argument is deprecated", "Invalid value for \"mode\""]
        );
    }

    #[test]
    fn unknown_values_skip_checks() {
        let config = Value::object([("path", Value::Unknown), ("mode", Value::Unknown)]);
        assert!(validate_config(&attributes(), &config).is_empty());
    }
}
