//! Wire-level schema descriptors advertised to the host

use std::collections::BTreeMap;

use crate::types::Type;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringKind {
    #[default]
    Plain,
    Markdown,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attribute {
    pub r#type: Type,
    pub description: String,
    pub description_kind: StringKind,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    pub deprecated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NestingMode {
    Single,
    List,
    Set,
    Map,
    Group,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NestedBlock {
    pub nesting: NestingMode,
    pub block: Block,
    pub min_items: i64,
    pub max_items: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub attributes: BTreeMap<String, Attribute>,
    pub block_types: BTreeMap<String, NestedBlock>,
    pub description: String,
    pub description_kind: StringKind,
    pub deprecated: bool,
}

impl Block {
    /// The object type that values conforming to this block decode into
    pub fn implied_type(&self) -> Type {
        let attributes = self
            .attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.r#type.clone()));
        let blocks = self.block_types.iter().map(|(name, nested)| {
            let object = nested.block.implied_type();
            let ty = match nested.nesting {
                NestingMode::Single | NestingMode::Group => object,
                NestingMode::List => Type::list(object),
                NestingMode::Set => Type::set(object),
                NestingMode::Map => Type::map(object),
            };
            (name.clone(), ty)
        });
        Type::Object(attributes.chain(blocks).collect())
    }
}

/// A versioned block; resources bump the version whenever persisted state needs upgrading
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    pub version: i64,
    pub block: Block,
}

impl Schema {
    pub fn implied_type(&self) -> Type {
        self.block.implied_type()
    }
}

/// Everything a provider advertises about itself
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderSchema {
    pub provider: Schema,
    pub provider_meta: Option<Schema>,
    pub resources: BTreeMap<String, Schema>,
    pub data_sources: BTreeMap<String, Schema>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_blocks_contribute_to_implied_type() {
        let mut inner = Block::default();
        inner.attributes.insert(
            "port".to_string(),
            Attribute {
                r#type: Type::Number,
                required: true,
                ..Default::default()
            },
        );
        let mut block = Block::default();
        block.attributes.insert(
            "name".to_string(),
            Attribute {
                r#type: Type::String,
                optional: true,
                ..Default::default()
            },
        );
        block.block_types.insert(
            "listener".to_string(),
            NestedBlock {
                nesting: NestingMode::List,
                block: inner,
                min_items: 0,
                max_items: 0,
            },
        );
        assert_eq!(
            block.implied_type(),
            Type::object([
                ("listener", Type::list(Type::object([("port", Type::Number)]))),
                ("name", Type::String),
            ])
        );
    }
}
