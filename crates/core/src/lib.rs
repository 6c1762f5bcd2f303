//! Types shared between the plugin runtime and provider implementations: the value and type
//! model, its wire codecs, schema descriptors, diagnostics and the host-provided environment.

pub mod diagnostic;
pub mod env;
pub mod error;
pub mod json;
pub mod logging;
pub mod msgpack;
pub mod path;
pub mod schema;
pub mod types;
pub mod value;

pub use diagnostic::{Diagnostic, Diagnostics, Severity};
pub use env::PluginEnv;
pub use error::{CodecError, ConfigError};
pub use path::{AttributePath, PathStep};
pub use schema::{Attribute, Block, NestedBlock, NestingMode, ProviderSchema, Schema, StringKind};
pub use types::Type;
pub use value::Value;
