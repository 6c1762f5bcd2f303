//! Framework for writing providers as a set of attribute schemas and CRUD handlers.
//!
//! A [`Provider`] owns the resource and data source types it offers. The host's plan and apply
//! protocol (defaults, unknown computed values, forced replacement, import followed by read) is
//! handled here, so handlers only deal with the remote objects themselves.

mod attribute;
mod context;
mod data;
mod error;
mod provider;
mod resource;
mod validate;

pub use attribute::{AttributeSchema, Validator};
pub use context::{Context, Meta};
pub use data::{ResourceData, ID_ATTRIBUTE};
pub use error::SchemaError;
pub use provider::{Provider, ProviderConfigurer};
pub use resource::{DataSource, DataSourceHandler, Resource, ResourceHandler};
pub use tfplugin_core::{Type, Value};

/// What resource, data source and configure handlers return. The error's message becomes the
/// summary of an error diagnostic.
pub type OperationResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
