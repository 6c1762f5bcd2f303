//! Helpers for building and inspecting the dynamic values exchanged with a provider

use anyhow::{Context as _, Result};
use tfplugin_core::{Diagnostics, Schema, Type, Value};
use tfplugin_sdk::convert::{decode_dynamic, diagnostics_from_proto, encode_dynamic};
use tfplugin_sdk::proto::tfplugin6 as pb;

/// Encode `value` for a block of the given schema
pub fn dynamic(value: &Value, schema: &Schema) -> Result<pb::DynamicValue> {
    encode_dynamic(value, &schema.implied_type()).context("failed to encode value")
}

/// Decode a value a provider returned for a block of the given schema
pub fn from_dynamic(value: Option<&pb::DynamicValue>, schema: &Schema) -> Result<Value> {
    decode_dynamic(value, &schema.implied_type()).context("failed to decode value")
}

/// An object with every attribute of `ty` null except the given ones
pub fn object<'a>(ty: &Type, attributes: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    let mut object = match Value::null_object(ty) {
        Value::Object(object) => object,
        _ => Default::default(),
    };
    for (name, value) in attributes {
        object.insert(name.to_string(), value);
    }
    Value::Object(object)
}

/// Fail with the rendered diagnostics if any of them is an error
pub fn ensure_no_errors(diagnostics: &[pb::Diagnostic]) -> Result<Diagnostics> {
    let diagnostics = diagnostics_from_proto(diagnostics);
    if diagnostics.has_errors() {
        let rendered: Vec<_> = diagnostics.iter().map(ToString::to_string).collect();
        anyhow::bail!("provider reported errors: {}", rendered.join("; "));
    }
    Ok(diagnostics)
}
