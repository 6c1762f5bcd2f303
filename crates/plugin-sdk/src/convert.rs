//! Conversions between the wire messages and the [`tfplugin_core`] model

use tfplugin_core::{
    json, msgpack, Attribute, AttributePath, Block, CodecError, Diagnostic, Diagnostics,
    NestedBlock, NestingMode, PathStep, Schema, Severity, StringKind, Type, Value,
};

use crate::proto::tfplugin6 as pb;
use pb::attribute_path::step::Selector;

/// Decodes a value sent by the host. Msgpack is preferred when both encodings are present, a
/// missing or empty value is null.
pub fn decode_dynamic(value: Option<&pb::DynamicValue>, ty: &Type) -> Result<Value, CodecError> {
    match value {
        Some(pb::DynamicValue { msgpack, .. }) if !msgpack.is_empty() => {
            msgpack::decode(msgpack, ty)
        }
        Some(pb::DynamicValue { json, .. }) if !json.is_empty() => json::decode(json, ty),
        _ => Ok(Value::Null),
    }
}

/// Encodes a value for the host, always as msgpack
pub fn encode_dynamic(value: &Value, ty: &Type) -> Result<pb::DynamicValue, CodecError> {
    Ok(pb::DynamicValue {
        msgpack: msgpack::encode(value, ty)?,
        json: Vec::new(),
    })
}

pub fn schema_to_proto(schema: &Schema) -> pb::Schema {
    pb::Schema {
        version: schema.version,
        block: Some(block_to_proto(&schema.block, schema.version)),
    }
}

fn block_to_proto(block: &Block, version: i64) -> pb::schema::Block {
    pb::schema::Block {
        version,
        attributes: block
            .attributes
            .iter()
            .map(|(name, attr)| attribute_to_proto(name, attr))
            .collect(),
        block_types: block
            .block_types
            .iter()
            .map(|(name, nested)| nested_block_to_proto(name, nested, version))
            .collect(),
        description: block.description.clone(),
        description_kind: string_kind_to_proto(block.description_kind) as i32,
        deprecated: block.deprecated,
    }
}

fn attribute_to_proto(name: &str, attr: &Attribute) -> pb::schema::Attribute {
    pb::schema::Attribute {
        name: name.to_string(),
        r#type: attr.r#type.to_json_bytes(),
        description: attr.description.clone(),
        required: attr.required,
        optional: attr.optional,
        computed: attr.computed,
        sensitive: attr.sensitive,
        description_kind: string_kind_to_proto(attr.description_kind) as i32,
        deprecated: attr.deprecated,
    }
}

fn nested_block_to_proto(
    name: &str,
    nested: &NestedBlock,
    version: i64,
) -> pb::schema::NestedBlock {
    use pb::schema::nested_block::NestingMode as Mode;

    let nesting = match nested.nesting {
        NestingMode::Single => Mode::Single,
        NestingMode::List => Mode::List,
        NestingMode::Set => Mode::Set,
        NestingMode::Map => Mode::Map,
        NestingMode::Group => Mode::Group,
    };
    pb::schema::NestedBlock {
        type_name: name.to_string(),
        block: Some(block_to_proto(&nested.block, version)),
        nesting: nesting as i32,
        min_items: nested.min_items,
        max_items: nested.max_items,
    }
}

fn string_kind_to_proto(kind: StringKind) -> pb::StringKind {
    match kind {
        StringKind::Plain => pb::StringKind::Plain,
        StringKind::Markdown => pb::StringKind::Markdown,
    }
}

pub fn path_to_proto(path: &AttributePath) -> pb::AttributePath {
    pb::AttributePath {
        steps: path
            .steps()
            .iter()
            .map(|step| pb::attribute_path::Step {
                selector: Some(match step {
                    PathStep::Attribute(name) => Selector::AttributeName(name.clone()),
                    PathStep::ElementKeyString(key) => Selector::ElementKeyString(key.clone()),
                    PathStep::ElementKeyInt(index) => Selector::ElementKeyInt(*index),
                }),
            })
            .collect(),
    }
}

/// Steps without a selector are skipped
pub fn path_from_proto(path: &pb::AttributePath) -> AttributePath {
    AttributePath(
        path.steps
            .iter()
            .filter_map(|step| {
                Some(match step.selector.as_ref()? {
                    Selector::AttributeName(name) => PathStep::Attribute(name.clone()),
                    Selector::ElementKeyString(key) => PathStep::ElementKeyString(key.clone()),
                    Selector::ElementKeyInt(index) => PathStep::ElementKeyInt(*index),
                })
            })
            .collect(),
    )
}

pub fn diagnostics_to_proto(diagnostics: Diagnostics) -> Vec<pb::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|diagnostic| pb::Diagnostic {
            severity: match diagnostic.severity {
                Severity::Error => pb::diagnostic::Severity::Error,
                Severity::Warning => pb::diagnostic::Severity::Warning,
            } as i32,
            summary: diagnostic.summary,
            detail: diagnostic.detail,
            attribute: diagnostic.attribute.as_ref().map(path_to_proto),
        })
        .collect()
}

/// Diagnostics with an invalid severity are treated as errors
pub fn diagnostics_from_proto(diagnostics: &[pb::Diagnostic]) -> Diagnostics {
    diagnostics
        .iter()
        .map(|diagnostic| {
            let converted = match diagnostic.severity() {
                pb::diagnostic::Severity::Warning => {
                    Diagnostic::warning(&diagnostic.summary, &diagnostic.detail)
                }
                _ => Diagnostic::error(&diagnostic.summary, &diagnostic.detail),
            };
            match &diagnostic.attribute {
                Some(path) => converted.with_attribute(path_from_proto(path)),
                None => converted,
            }
        })
        .collect()
}
