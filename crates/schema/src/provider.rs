use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tfplugin_core::{Diagnostic, Diagnostics, ProviderSchema, Schema, Value};
use tfplugin_sdk::handler::{
    ApplyResourceChangeRequest, ApplyResourceChangeResponse, ImportResourceStateRequest,
    ImportResourceStateResponse, PlanResourceChangeRequest, PlanResourceChangeResponse,
    ReadDataSourceRequest, ReadDataSourceResponse, ReadResourceRequest, ReadResourceResponse,
    UpgradeResourceStateRequest, UpgradeResourceStateResponse,
};
use tfplugin_sdk::ProviderHandler;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::attribute::AttributeSchema;
use crate::context::{Context, Meta};
use crate::data::{ResourceData, ID_ATTRIBUTE};
use crate::resource::{block, DataSource, Resource};
use crate::validate::validate_config;
use crate::{OperationResult, SchemaError};

/// Turns the provider configuration into the [`Meta`] every operation receives
#[async_trait]
pub trait ProviderConfigurer: Send + Sync + 'static {
    async fn configure(&self, terraform_version: &str, config: &ResourceData)
        -> OperationResult<Meta>;
}

/// A provider assembled from attribute schemas, resources and data sources.
///
/// Implements [`ProviderHandler`], so it can be handed to [`tfplugin_sdk::serve`] as is.
#[derive(Default)]
pub struct Provider {
    attributes: BTreeMap<String, AttributeSchema>,
    resources: BTreeMap<String, Resource>,
    data_sources: BTreeMap<String, DataSource>,
    configurer: Option<Arc<dyn ProviderConfigurer>>,
    meta: RwLock<Option<Meta>>,
    stop: CancellationToken,
}

fn unknown_type(kind: &str, type_name: &str) -> Diagnostics {
    Diagnostic::error(
        format!("Unknown {kind} type"),
        format!("This provider does not support {kind} type {type_name:?}"),
    )
    .into()
}

fn is_valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

fn check_block(
    block: &str,
    attributes: &BTreeMap<String, AttributeSchema>,
) -> Result<(), SchemaError> {
    for (name, attr) in attributes {
        let (block, attribute) = (block.to_string(), name.clone());
        if attr.required && attr.computed {
            return Err(SchemaError::RequiredAndComputed { block, attribute });
        }
        if !attr.required && !attr.optional && !attr.computed {
            return Err(SchemaError::Unconfigurable { block, attribute });
        }
        if attr.required && attr.default.is_some() {
            return Err(SchemaError::RequiredWithDefault { block, attribute });
        }
        if attr.is_computed_only() && attr.force_new {
            return Err(SchemaError::ComputedForceNew { block, attribute });
        }
        if name == ID_ATTRIBUTE && !attr.computed {
            return Err(SchemaError::ConfigurableId { block });
        }
    }
    Ok(())
}

impl Provider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute to the provider configuration block
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, attr: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    #[must_use]
    pub fn resource(mut self, type_name: impl Into<String>, resource: Resource) -> Self {
        self.resources.insert(type_name.into(), resource);
        self
    }

    #[must_use]
    pub fn data_source(mut self, type_name: impl Into<String>, data_source: DataSource) -> Self {
        self.data_sources.insert(type_name.into(), data_source);
        self
    }

    #[must_use]
    pub fn configurer(mut self, configurer: impl ProviderConfigurer) -> Self {
        self.configurer = Some(Arc::new(configurer));
        self
    }

    pub fn resources(&self) -> &BTreeMap<String, Resource> {
        &self.resources
    }

    pub fn data_sources(&self) -> &BTreeMap<String, DataSource> {
        &self.data_sources
    }

    /// Checks that every block is one the host would accept. Meant to be called from a provider's
    /// tests.
    pub fn internal_validate(&self) -> Result<(), SchemaError> {
        check_block("provider", &self.attributes)?;
        if self.attributes.contains_key(ID_ATTRIBUTE) {
            return Err(SchemaError::ConfigurableId {
                block: "provider".to_string(),
            });
        }
        for (type_name, resource) in &self.resources {
            if !is_valid_type_name(type_name) {
                return Err(SchemaError::InvalidTypeName(type_name.clone()));
            }
            check_block(type_name, resource.attributes())?;
        }
        for (type_name, data_source) in &self.data_sources {
            if !is_valid_type_name(type_name) {
                return Err(SchemaError::InvalidTypeName(type_name.clone()));
            }
            check_block(type_name, data_source.attributes())?;
        }
        Ok(())
    }

    async fn context(&self) -> Context {
        Context::new(self.meta.read().await.clone(), self.stop.clone())
    }
}

#[async_trait]
impl ProviderHandler for Provider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            provider: Schema {
                version: 0,
                block: block(&self.attributes, ""),
            },
            provider_meta: None,
            resources: self
                .resources
                .iter()
                .map(|(name, resource)| (name.clone(), resource.schema()))
                .collect(),
            data_sources: self
                .data_sources
                .iter()
                .map(|(name, data_source)| (name.clone(), data_source.schema()))
                .collect(),
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Diagnostics {
        validate_config(&self.attributes, &config)
    }

    #[instrument(level = "debug", skip(self, config))]
    async fn configure_provider(&self, terraform_version: String, config: Value) -> Diagnostics {
        let mut diagnostics = validate_config(&self.attributes, &config);
        if diagnostics.has_errors() {
            return diagnostics;
        }
        let Some(configurer) = &self.configurer else {
            return diagnostics;
        };
        let data = ResourceData::new(config);
        match configurer.configure(&terraform_version, &data).await {
            Ok(meta) => {
                *self.meta.write().await = Some(meta);
                info!("provider configured");
            }
            Err(e) => {
                warn!(error = %e, "failed to configure provider");
                diagnostics.error("Failed to configure provider", format!("{e:#}"));
            }
        }
        diagnostics
    }

    async fn validate_resource_config(&self, type_name: &str, config: Value) -> Diagnostics {
        match self.resources.get(type_name) {
            Some(resource) => validate_config(resource.attributes(), &config),
            None => unknown_type("resource", type_name),
        }
    }

    async fn validate_data_resource_config(&self, type_name: &str, config: Value) -> Diagnostics {
        match self.data_sources.get(type_name) {
            Some(data_source) => validate_config(data_source.attributes(), &config),
            None => unknown_type("data source", type_name),
        }
    }

    async fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
    ) -> UpgradeResourceStateResponse {
        match self.resources.get(&request.type_name) {
            Some(resource) => resource.upgrade(request.version, &request.raw_state),
            None => UpgradeResourceStateResponse {
                diagnostics: unknown_type("resource", &request.type_name),
                ..Default::default()
            },
        }
    }

    async fn read_resource(&self, request: ReadResourceRequest) -> ReadResourceResponse {
        let Some(resource) = self.resources.get(&request.type_name) else {
            return ReadResourceResponse {
                new_state: request.current_state,
                private: request.private,
                diagnostics: unknown_type("resource", &request.type_name),
            };
        };
        let ctx = self.context().await;
        resource
            .read(&ctx, request.current_state, request.private)
            .await
    }

    async fn plan_resource_change(
        &self,
        request: PlanResourceChangeRequest,
    ) -> PlanResourceChangeResponse {
        let Some(resource) = self.resources.get(&request.type_name) else {
            return PlanResourceChangeResponse {
                diagnostics: unknown_type("resource", &request.type_name),
                ..Default::default()
            };
        };
        resource.plan(
            request.prior_state,
            request.proposed_new_state,
            &request.config,
            request.prior_private,
        )
    }

    async fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest,
    ) -> ApplyResourceChangeResponse {
        let Some(resource) = self.resources.get(&request.type_name) else {
            return ApplyResourceChangeResponse {
                new_state: request.prior_state,
                diagnostics: unknown_type("resource", &request.type_name),
                ..Default::default()
            };
        };
        let ctx = self.context().await;
        resource
            .apply(
                &ctx,
                request.prior_state,
                request.planned_state,
                request.planned_private,
            )
            .await
    }

    async fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        let Some(resource) = self.resources.get(&request.type_name) else {
            return ImportResourceStateResponse {
                diagnostics: unknown_type("resource", &request.type_name),
                ..Default::default()
            };
        };
        let ctx = self.context().await;
        resource.import(&ctx, &request.type_name, &request.id).await
    }

    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        let Some(data_source) = self.data_sources.get(&request.type_name) else {
            return ReadDataSourceResponse {
                diagnostics: unknown_type("data source", &request.type_name),
                ..Default::default()
            };
        };
        let ctx = self.context().await;
        data_source.read(&ctx, request.config).await
    }

    async fn stop(&self) -> Result<(), String> {
        info!("stopping in-flight operations");
        self.stop.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tfplugin_core::Type;

    use super::*;
    use crate::resource::{DataSourceHandler, ResourceHandler};

    struct Root;

    #[async_trait]
    impl ProviderConfigurer for Root {
        async fn configure(
            &self,
            _terraform_version: &str,
            config: &ResourceData,
        ) -> OperationResult<Meta> {
            let root = config.get_str("root").unwrap_or("/");
            if root.is_empty() {
                return Err("root cannot be empty".into());
            }
            Ok(Arc::new(PathBuf::from(root)))
        }
    }

    /// Reports the configured root as its ID
    struct Whoami;

    #[async_trait]
    impl DataSourceHandler for Whoami {
        async fn read(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()> {
            let root = ctx.meta::<PathBuf>().ok_or("provider is not configured")?;
            data.set_id(root.display().to_string());
            Ok(())
        }
    }

    /// Blocks until stopped
    struct Waiter;

    #[async_trait]
    impl ResourceHandler for Waiter {
        async fn create(&self, ctx: &Context, _data: &mut ResourceData) -> OperationResult<()> {
            ctx.stopped().cancelled().await;
            Err("interrupted".into())
        }

        async fn read(&self, _ctx: &Context, _data: &mut ResourceData) -> OperationResult<()> {
            Ok(())
        }

        async fn delete(&self, _ctx: &Context, _data: &mut ResourceData) -> OperationResult<()> {
            Ok(())
        }
    }

    fn provider() -> Provider {
        Provider::new()
            .attribute("root", AttributeSchema::string().optional())
            .configurer(Root)
            .data_source("test_whoami", DataSource::new(Whoami))
            .resource("test_waiter", Resource::new(Waiter))
    }

    #[test]
    fn schema_lists_every_type() {
        let provider = provider();
        provider.internal_validate().unwrap();
        let schema = provider.schema();
        assert_eq!(
            schema.provider.block.attributes["root"].r#type,
            Type::String
        );
        assert!(schema.resources.contains_key("test_waiter"));
        assert!(schema.data_sources["test_whoami"]
            .block
            .attributes
            .contains_key("id"));
    }

    #[test]
    fn internal_validate_rejects_bad_blocks() {
        let required_computed = Provider::new()
            .attribute("root", AttributeSchema::string().required().computed());
        assert_eq!(
            required_computed.internal_validate(),
            Err(SchemaError::RequiredAndComputed {
                block: "provider".to_string(),
                attribute: "root".to_string(),
            })
        );

        let unflagged = Provider::new().resource(
            "test_waiter",
            Resource::new(Waiter).attribute("size", AttributeSchema::number()),
        );
        assert!(matches!(
            unflagged.internal_validate(),
            Err(SchemaError::Unconfigurable { .. })
        ));

        let bad_name = Provider::new().data_source("Test-Whoami", DataSource::new(Whoami));
        assert_eq!(
            bad_name.internal_validate(),
            Err(SchemaError::InvalidTypeName("Test-Whoami".to_string()))
        );

        let configurable_id = Provider::new().resource(
            "test_waiter",
            Resource::new(Waiter).attribute("id", AttributeSchema::string().required()),
        );
        assert!(matches!(
            configurable_id.internal_validate(),
            Err(SchemaError::ConfigurableId { .. })
        ));
    }

    #[test_log::test(tokio::test)]
    async fn configured_meta_reaches_operations() {
        let provider = provider();

        let unconfigured = provider
            .read_data_source(ReadDataSourceRequest {
                type_name: "test_whoami".to_string(),
                config: Value::object([("id", Value::Null)]),
                ..Default::default()
            })
            .await;
        assert!(unconfigured.diagnostics.has_errors());
        assert!(unconfigured.state.is_null());

        let config = Value::object([("root", Value::string("/srv"))]);
        let diagnostics = provider
            .configure_provider("1.9.0".to_string(), config)
            .await;
        assert!(diagnostics.is_empty());

        let read = provider
            .read_data_source(ReadDataSourceRequest {
                type_name: "test_whoami".to_string(),
                config: Value::object([("id", Value::Null)]),
                ..Default::default()
            })
            .await;
        assert!(read.diagnostics.is_empty());
        assert_eq!(read.state.get_attr("id"), Some(&Value::string("/srv")));
    }

    #[test_log::test(tokio::test)]
    async fn configure_errors_become_diagnostics() {
        let provider = provider();
        let diagnostics = provider
            .configure_provider(
                "1.9.0".to_string(),
                Value::object([("root", Value::string(""))]),
            )
            .await;
        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.summary, "Failed to configure provider");
        assert_eq!(diagnostic.detail, "root cannot be empty");
    }

    #[tokio::test]
    async fn unknown_types_are_reported() {
        let provider = provider();
        let diagnostics = provider
            .validate_resource_config("test_nope", Value::Null)
            .await;
        assert!(diagnostics.has_errors());

        let read = provider
            .read_resource(ReadResourceRequest {
                type_name: "test_nope".to_string(),
                current_state: Value::string("kept"),
                ..Default::default()
            })
            .await;
        assert_eq!(read.new_state, Value::string("kept"));
        assert!(read.diagnostics.has_errors());
    }

    #[test_log::test(tokio::test)]
    async fn stop_interrupts_operations() {
        let provider = Arc::new(provider());
        let apply = tokio::spawn({
            let provider = Arc::clone(&provider);
            async move {
                provider
                    .apply_resource_change(ApplyResourceChangeRequest {
                        type_name: "test_waiter".to_string(),
                        planned_state: Value::object([("id", Value::Unknown)]),
                        ..Default::default()
                    })
                    .await
            }
        });
        provider.stop().await.unwrap();
        let applied = apply.await.unwrap();
        assert!(applied.new_state.is_null());
        assert_eq!(applied.diagnostics.iter().next().unwrap().summary, "interrupted");
    }
}
