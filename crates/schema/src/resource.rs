//! Managed resources and data sources, and the lifecycle rules that turn their handlers into
//! plan, apply, read, import and upgrade results

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tfplugin_core::{json, AttributePath, Block, Diagnostic, Diagnostics, Schema, Value};
use tfplugin_sdk::handler::{
    ApplyResourceChangeResponse, ImportResourceStateResponse, ImportedResource,
    PlanResourceChangeResponse, RawState, ReadDataSourceResponse, ReadResourceResponse,
    UpgradeResourceStateResponse,
};
use tracing::{debug, instrument};

use crate::attribute::AttributeSchema;
use crate::context::Context;
use crate::data::{ResourceData, ID_ATTRIBUTE};
use crate::OperationResult;

/// CRUD implementation of a managed resource.
///
/// Every operation works on a [`ResourceData`]: `create` and `update` start from the planned
/// values, `read` and `delete` from the current state. Clearing the ID in `read` reports the
/// object as gone.
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    async fn create(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()>;

    async fn read(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()>;

    async fn update(&self, _ctx: &Context, _data: &mut ResourceData) -> OperationResult<()> {
        Err("resource does not support in-place update".into())
    }

    async fn delete(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()>;

    /// Called with only the ID set to the import ID. The default keeps the import ID as the
    /// object's ID, `read` fills in the rest.
    async fn import(&self, _ctx: &Context, _data: &mut ResourceData) -> OperationResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DataSourceHandler: Send + Sync + 'static {
    /// Starts from the configuration and sets the computed attributes
    async fn read(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()>;
}

pub(crate) fn block(attributes: &BTreeMap<String, AttributeSchema>, description: &str) -> Block {
    Block {
        attributes: attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.to_core()))
            .collect(),
        description: description.to_string(),
        ..Default::default()
    }
}

fn with_id_attribute(
    mut attributes: BTreeMap<String, AttributeSchema>,
) -> BTreeMap<String, AttributeSchema> {
    attributes
        .entry(ID_ATTRIBUTE.to_string())
        .or_insert_with(|| {
            AttributeSchema::string()
                .computed()
                .description("Identifier of the object")
        });
    attributes
}

/// The alternate form includes the cause chain of errors that carry one, such as `anyhow`'s
fn operation_failed(err: &(dyn std::error::Error + Send + Sync)) -> Diagnostic {
    Diagnostic::error(format!("{err:#}"), "")
}

/// A managed resource type
#[derive(Clone)]
pub struct Resource {
    schema_version: i64,
    description: String,
    attributes: BTreeMap<String, AttributeSchema>,
    handler: Arc<dyn ResourceHandler>,
}

impl Resource {
    pub fn new(handler: impl ResourceHandler) -> Self {
        Self {
            schema_version: 0,
            description: String::new(),
            attributes: with_id_attribute(BTreeMap::new()),
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, attr: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    #[must_use]
    pub fn schema_version(mut self, version: i64) -> Self {
        self.schema_version = version;
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeSchema> {
        &self.attributes
    }

    pub fn schema(&self) -> Schema {
        Schema {
            version: self.schema_version,
            block: block(&self.attributes, &self.description),
        }
    }

    fn state(&self, data: &ResourceData) -> Value {
        data.to_value(self.attributes.keys())
    }

    /// Plans the change from `prior_state` to `proposed_new_state`.
    ///
    /// Creates get defaults applied and unset computed attributes unknown. Updates get defaults
    /// applied, changed `force_new` attributes marked as requiring replacement and, when anything
    /// configurable changes, computed-only attributes other than the ID unknown. A planned
    /// replacement behaves like a create for computed attributes.
    pub(crate) fn plan(
        &self,
        prior_state: Value,
        proposed_new_state: Value,
        config: &Value,
        prior_private: Vec<u8>,
    ) -> PlanResourceChangeResponse {
        if proposed_new_state.is_null() {
            return PlanResourceChangeResponse {
                planned_state: Value::Null,
                planned_private: prior_private,
                ..Default::default()
            };
        }

        let creating = prior_state.is_null();
        let mut planned = ResourceData::new(proposed_new_state);
        let unset_in_config =
            |name: &str| config.get_attr(name).map_or(true, Value::is_null);

        for (name, attr) in &self.attributes {
            if let Some(default) = &attr.default {
                if unset_in_config(name) {
                    planned.set(name.as_str(), default.clone());
                }
            }
        }

        let prior = ResourceData::new(prior_state.clone());
        let mut requires_replace = Vec::new();
        let mut changed = false;
        if !creating {
            for (name, attr) in &self.attributes {
                if attr.is_computed_only() || planned.get(name) == prior.get(name) {
                    continue;
                }
                changed = true;
                if attr.force_new {
                    debug!(attribute = %name, "change requires replacement");
                    requires_replace.push(AttributePath::attribute(name.as_str()));
                }
            }
        }

        let replacing = !requires_replace.is_empty();
        for (name, attr) in &self.attributes {
            if !attr.computed || !unset_in_config(name) {
                continue;
            }
            let unknown = if creating || replacing {
                planned.get(name).is_null() || (replacing && attr.is_computed_only())
            } else {
                changed && attr.is_computed_only() && name != ID_ATTRIBUTE
            };
            if unknown {
                planned.set(name.as_str(), Value::Unknown);
            }
        }

        let planned_state = if !creating && !changed {
            prior_state
        } else {
            self.state(&planned)
        };
        PlanResourceChangeResponse {
            planned_state,
            requires_replace,
            planned_private: prior_private,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Applies a planned change: a null plan deletes, a null prior state creates, anything else
    /// updates. Values still unknown afterwards are nulled.
    #[instrument(level = "debug", skip_all)]
    pub(crate) async fn apply(
        &self,
        ctx: &Context,
        prior_state: Value,
        planned_state: Value,
        planned_private: Vec<u8>,
    ) -> ApplyResourceChangeResponse {
        let mut diagnostics = Diagnostics::new();

        if planned_state.is_null() {
            let mut data = ResourceData::new(prior_state.clone());
            if let Err(e) = self.handler.delete(ctx, &mut data).await {
                diagnostics.push(operation_failed(e.as_ref()));
                return ApplyResourceChangeResponse {
                    new_state: prior_state,
                    private: planned_private,
                    diagnostics,
                };
            }
            diagnostics.extend(data.take_warnings());
            return ApplyResourceChangeResponse {
                new_state: Value::Null,
                private: Vec::new(),
                diagnostics,
            };
        }

        if prior_state.is_null() {
            let mut data = ResourceData::new(planned_state);
            let result = self.handler.create(ctx, &mut data).await;
            diagnostics.extend(data.take_warnings());
            if let Err(e) = result {
                diagnostics.push(operation_failed(e.as_ref()));
            }
            // an object that got an ID exists, even when create failed halfway
            let new_state = if data.id().is_some() {
                self.state(&data).unknown_as_null()
            } else {
                Value::Null
            };
            return ApplyResourceChangeResponse {
                new_state,
                private: planned_private,
                diagnostics,
            };
        }

        let mut data = ResourceData::new(planned_state).with_prior(prior_state.clone());
        let result = self.handler.update(ctx, &mut data).await;
        diagnostics.extend(data.take_warnings());
        let new_state = match result {
            Ok(()) => self.state(&data).unknown_as_null(),
            Err(e) => {
                diagnostics.push(operation_failed(e.as_ref()));
                prior_state
            }
        };
        ApplyResourceChangeResponse {
            new_state,
            private: planned_private,
            diagnostics,
        }
    }

    /// Refreshes `current_state`. A cleared ID yields a null state.
    #[instrument(level = "debug", skip_all)]
    pub(crate) async fn read(
        &self,
        ctx: &Context,
        current_state: Value,
        private: Vec<u8>,
    ) -> ReadResourceResponse {
        if current_state.is_null() {
            return ReadResourceResponse {
                new_state: Value::Null,
                private,
                diagnostics: Diagnostics::new(),
            };
        }
        let mut data = ResourceData::new(current_state.clone());
        let result = self.handler.read(ctx, &mut data).await;
        let mut diagnostics = data.take_warnings();
        let new_state = match result {
            Ok(()) if data.id().is_none() => {
                debug!("object no longer exists");
                Value::Null
            }
            Ok(()) => self.state(&data).unknown_as_null(),
            Err(e) => {
                diagnostics.push(operation_failed(e.as_ref()));
                current_state
            }
        };
        ReadResourceResponse {
            new_state,
            private,
            diagnostics,
        }
    }

    /// Imports the object identified by `id`, then reads it
    #[instrument(level = "debug", skip(self, ctx))]
    pub(crate) async fn import(
        &self,
        ctx: &Context,
        type_name: &str,
        id: &str,
    ) -> ImportResourceStateResponse {
        let mut data = ResourceData::new(Value::Null);
        data.set_id(id);
        let mut diagnostics = Diagnostics::new();

        let result = match self.handler.import(ctx, &mut data).await {
            Ok(()) => self.handler.read(ctx, &mut data).await,
            Err(e) => Err(e),
        };
        diagnostics.extend(data.take_warnings());
        if let Err(e) = result {
            diagnostics.push(operation_failed(e.as_ref()));
            return ImportResourceStateResponse {
                imported_resources: Vec::new(),
                diagnostics,
            };
        }
        if data.id().is_none() {
            diagnostics.push(Diagnostic::error(
                "Cannot import non-existent remote object",
                format!(
                    "While attempting to import an existing object to {type_name:?}, the provider \
                     detected that no object exists with the given id. Only pre-existing objects \
                     can be imported; check that the id is correct."
                ),
            ));
            return ImportResourceStateResponse {
                imported_resources: Vec::new(),
                diagnostics,
            };
        }
        ImportResourceStateResponse {
            imported_resources: vec![ImportedResource {
                type_name: type_name.to_string(),
                state: self.state(&data).unknown_as_null(),
                private: Vec::new(),
            }],
            diagnostics,
        }
    }

    /// Decodes stored JSON state against the current schema, dropping attributes that no longer
    /// exist. Legacy flatmap state is not supported.
    pub(crate) fn upgrade(
        &self,
        version: i64,
        raw_state: &RawState,
    ) -> UpgradeResourceStateResponse {
        let mut diagnostics = Diagnostics::new();
        if version > self.schema_version {
            diagnostics.error(
                "Unsupported state version",
                format!(
                    "The state was written with schema version {version}, which is newer than \
                     the version {} supported by this provider.",
                    self.schema_version
                ),
            );
            return UpgradeResourceStateResponse {
                upgraded_state: Value::Null,
                diagnostics,
            };
        }

        let upgraded_state = match &raw_state.json {
            Some(state) => match json::decode_lenient(state, &self.schema().implied_type()) {
                Ok(value) => value,
                Err(e) => {
                    diagnostics.error("Failed to decode stored state", e.to_string());
                    Value::Null
                }
            },
            None if !raw_state.flatmap.is_empty() => {
                diagnostics.error(
                    "Unsupported state format",
                    "The state is stored in the legacy flatmap format, which this provider cannot \
                     read.",
                );
                Value::Null
            }
            None => Value::Null,
        };
        UpgradeResourceStateResponse {
            upgraded_state,
            diagnostics,
        }
    }
}

/// A data source type
#[derive(Clone)]
pub struct DataSource {
    description: String,
    attributes: BTreeMap<String, AttributeSchema>,
    handler: Arc<dyn DataSourceHandler>,
}

impl DataSource {
    pub fn new(handler: impl DataSourceHandler) -> Self {
        Self {
            description: String::new(),
            attributes: with_id_attribute(BTreeMap::new()),
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, attr: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeSchema> {
        &self.attributes
    }

    pub fn schema(&self) -> Schema {
        Schema {
            version: 0,
            block: block(&self.attributes, &self.description),
        }
    }

    #[instrument(level = "debug", skip_all)]
    pub(crate) async fn read(&self, ctx: &Context, config: Value) -> ReadDataSourceResponse {
        let mut data = ResourceData::new(config);
        let result = self.handler.read(ctx, &mut data).await;
        let mut diagnostics = data.take_warnings();
        let state = match result {
            Ok(()) => data.to_value(self.attributes.keys()).unknown_as_null(),
            Err(e) => {
                diagnostics.push(operation_failed(e.as_ref()));
                Value::Null
            }
        };
        ReadDataSourceResponse { state, diagnostics }
    }
}
