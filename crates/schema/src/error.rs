use thiserror::Error;

/// A provider definition the host could not use
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    #[error("{block}: attribute `{attribute}` cannot be both required and computed")]
    RequiredAndComputed { block: String, attribute: String },

    #[error("{block}: attribute `{attribute}` must be required, optional or computed")]
    Unconfigurable { block: String, attribute: String },

    #[error("{block}: required attribute `{attribute}` cannot have a default")]
    RequiredWithDefault { block: String, attribute: String },

    #[error("{block}: computed-only attribute `{attribute}` cannot force replacement")]
    ComputedForceNew { block: String, attribute: String },

    #[error("{block}: attribute `id` must be computed")]
    ConfigurableId { block: String },

    #[error("`{0}` is not a valid type name")]
    InvalidTypeName(String),
}
