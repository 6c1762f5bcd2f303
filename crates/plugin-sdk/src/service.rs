//! The `tfplugin6.Provider` gRPC service, translating between wire messages and a
//! [`ProviderHandler`]

use std::sync::Arc;

use tfplugin_core::{CodecError, Diagnostic, Diagnostics, ProviderSchema, Schema, Type, Value};
use tonic::{Request, Response, Status};
use tracing::{debug, trace};

use crate::convert::{decode_dynamic, diagnostics_to_proto, encode_dynamic, path_to_proto};
use crate::handler::{
    ApplyResourceChangeRequest, ImportResourceStateRequest, PlanResourceChangeRequest, RawState,
    ReadDataSourceRequest, ReadResourceRequest, UpgradeResourceStateRequest,
};
use crate::proto::tfplugin6 as pb;
use crate::ProviderHandler;

use pb::provider_server::Provider;
use pb::{
    apply_resource_change, configure_provider, get_metadata, get_provider_schema,
    import_resource_state, plan_resource_change, read_data_source, read_resource,
    stop_provider, upgrade_resource_state, validate_data_resource_config,
    validate_provider_config, validate_resource_config,
};

/// Responses that can carry diagnostics in place of a result
trait WithDiagnostics: Default {
    fn diagnostics_mut(&mut self) -> &mut Vec<pb::Diagnostic>;
}

macro_rules! impl_with_diagnostics {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WithDiagnostics for $ty {
                fn diagnostics_mut(&mut self) -> &mut Vec<pb::Diagnostic> {
                    &mut self.diagnostics
                }
            }
        )*
    };
}

impl_with_diagnostics!(
    validate_provider_config::Response,
    validate_resource_config::Response,
    validate_data_resource_config::Response,
    upgrade_resource_state::Response,
    configure_provider::Response,
    read_resource::Response,
    plan_resource_change::Response,
    apply_resource_change::Response,
    import_resource_state::Response,
    read_data_source::Response,
);

/// Failures that reach the host as diagnostics instead of a result
type RpcResult<T> = Result<T, Diagnostics>;

fn respond<T: WithDiagnostics>(result: RpcResult<T>) -> Result<Response<T>, Status> {
    Ok(Response::new(match result {
        Ok(response) => response,
        Err(diagnostics) => {
            let mut response = T::default();
            response
                .diagnostics_mut()
                .extend(diagnostics_to_proto(diagnostics));
            response
        }
    }))
}

fn invalid(what: &str) -> impl FnOnce(CodecError) -> Diagnostics + '_ {
    move |e| Diagnostic::error(format!("Invalid {what}"), e.to_string()).into()
}

fn unencodable(what: &str) -> impl FnOnce(CodecError) -> Diagnostics + '_ {
    move |e| {
        Diagnostic::error(
            format!("Provider produced an invalid {what}"),
            e.to_string(),
        )
        .into()
    }
}

fn server_capabilities() -> pb::ServerCapabilities {
    pb::ServerCapabilities {
        plan_destroy: true,
        get_provider_schema_optional: true,
    }
}

pub(crate) struct ProviderService<H> {
    handler: Arc<H>,
    schema: Arc<ProviderSchema>,
}

impl<H: ProviderHandler> ProviderService<H> {
    /// Requests the provider schema once; every value is decoded against it
    pub(crate) fn new(handler: H) -> Self {
        let schema = handler.schema();
        Self {
            handler: Arc::new(handler),
            schema: Arc::new(schema),
        }
    }

    fn resource_schema(&self, type_name: &str) -> RpcResult<&Schema> {
        self.schema.resources.get(type_name).ok_or_else(|| {
            Diagnostic::error(
                "Unknown resource type",
                format!("The provider does not support resource type {type_name:?}."),
            )
            .into()
        })
    }

    fn data_source_schema(&self, type_name: &str) -> RpcResult<&Schema> {
        self.schema.data_sources.get(type_name).ok_or_else(|| {
            Diagnostic::error(
                "Unknown data source",
                format!("The provider does not support data source {type_name:?}."),
            )
            .into()
        })
    }

    fn provider_meta(&self, value: Option<&pb::DynamicValue>) -> RpcResult<Value> {
        match &self.schema.provider_meta {
            Some(schema) => {
                decode_dynamic(value, &schema.implied_type()).map_err(invalid("provider_meta"))
            }
            None => Ok(Value::Null),
        }
    }
}

fn encode(value: &Value, ty: &Type, what: &str) -> RpcResult<Option<pb::DynamicValue>> {
    encode_dynamic(value, ty).map(Some).map_err(unencodable(what))
}

#[tonic::async_trait]
impl<H: ProviderHandler> Provider for ProviderService<H> {
    async fn get_metadata(
        &self,
        _request: Request<get_metadata::Request>,
    ) -> Result<Response<get_metadata::Response>, Status> {
        debug!("GetMetadata");
        Ok(Response::new(get_metadata::Response {
            server_capabilities: Some(server_capabilities()),
            diagnostics: Vec::new(),
            data_sources: self
                .schema
                .data_sources
                .keys()
                .map(|type_name| get_metadata::DataSourceMetadata {
                    type_name: type_name.clone(),
                })
                .collect(),
            resources: self
                .schema
                .resources
                .keys()
                .map(|type_name| get_metadata::ResourceMetadata {
                    type_name: type_name.clone(),
                })
                .collect(),
        }))
    }

    async fn get_provider_schema(
        &self,
        _request: Request<get_provider_schema::Request>,
    ) -> Result<Response<get_provider_schema::Response>, Status> {
        debug!("GetProviderSchema");
        let schema = &self.schema;
        Ok(Response::new(get_provider_schema::Response {
            provider: Some(crate::convert::schema_to_proto(&schema.provider)),
            resource_schemas: schema
                .resources
                .iter()
                .map(|(name, s)| (name.clone(), crate::convert::schema_to_proto(s)))
                .collect(),
            data_source_schemas: schema
                .data_sources
                .iter()
                .map(|(name, s)| (name.clone(), crate::convert::schema_to_proto(s)))
                .collect(),
            diagnostics: Vec::new(),
            provider_meta: schema
                .provider_meta
                .as_ref()
                .map(crate::convert::schema_to_proto),
            server_capabilities: Some(server_capabilities()),
        }))
    }

    async fn validate_provider_config(
        &self,
        request: Request<validate_provider_config::Request>,
    ) -> Result<Response<validate_provider_config::Response>, Status> {
        debug!("ValidateProviderConfig");
        let request = request.into_inner();
        respond(
            async {
                let ty = self.schema.provider.implied_type();
                let config = decode_dynamic(request.config.as_ref(), &ty)
                    .map_err(invalid("provider configuration"))?;
                Ok::<_, Diagnostics>(validate_provider_config::Response {
                    diagnostics: diagnostics_to_proto(
                        self.handler.validate_provider_config(config).await,
                    ),
                })
            }
            .await,
        )
    }

    async fn validate_resource_config(
        &self,
        request: Request<validate_resource_config::Request>,
    ) -> Result<Response<validate_resource_config::Response>, Status> {
        let request = request.into_inner();
        debug!(type_name = %request.type_name, "ValidateResourceConfig");
        respond(
            async {
                let ty = self.resource_schema(&request.type_name)?.implied_type();
                let config = decode_dynamic(request.config.as_ref(), &ty)
                    .map_err(invalid("resource configuration"))?;
                Ok::<_, Diagnostics>(validate_resource_config::Response {
                    diagnostics: diagnostics_to_proto(
                        self.handler
                            .validate_resource_config(&request.type_name, config)
                            .await,
                    ),
                })
            }
            .await,
        )
    }

    async fn validate_data_resource_config(
        &self,
        request: Request<validate_data_resource_config::Request>,
    ) -> Result<Response<validate_data_resource_config::Response>, Status> {
        let request = request.into_inner();
        debug!(type_name = %request.type_name, "ValidateDataResourceConfig");
        respond(
            async {
                let ty = self.data_source_schema(&request.type_name)?.implied_type();
                let config = decode_dynamic(request.config.as_ref(), &ty)
                    .map_err(invalid("data source configuration"))?;
                Ok::<_, Diagnostics>(validate_data_resource_config::Response {
                    diagnostics: diagnostics_to_proto(
                        self.handler
                            .validate_data_resource_config(&request.type_name, config)
                            .await,
                    ),
                })
            }
            .await,
        )
    }

    async fn upgrade_resource_state(
        &self,
        request: Request<upgrade_resource_state::Request>,
    ) -> Result<Response<upgrade_resource_state::Response>, Status> {
        let request = request.into_inner();
        debug!(
            type_name = %request.type_name,
            version = request.version,
            "UpgradeResourceState"
        );
        respond(
            async {
                let ty = self.resource_schema(&request.type_name)?.implied_type();
                let raw_state = request
                    .raw_state
                    .map(|raw| RawState {
                        json: Some(raw.json).filter(|json| !json.is_empty()),
                        flatmap: raw.flatmap,
                    })
                    .unwrap_or_default();
                let response = self
                    .handler
                    .upgrade_resource_state(UpgradeResourceStateRequest {
                        type_name: request.type_name,
                        version: request.version,
                        raw_state,
                    })
                    .await;
                Ok::<_, Diagnostics>(upgrade_resource_state::Response {
                    upgraded_state: encode(&response.upgraded_state, &ty, "upgraded state")?,
                    diagnostics: diagnostics_to_proto(response.diagnostics),
                })
            }
            .await,
        )
    }

    async fn configure_provider(
        &self,
        request: Request<configure_provider::Request>,
    ) -> Result<Response<configure_provider::Response>, Status> {
        let request = request.into_inner();
        debug!(
            terraform_version = %request.terraform_version,
            "ConfigureProvider"
        );
        respond(
            async {
                let ty = self.schema.provider.implied_type();
                let config = decode_dynamic(request.config.as_ref(), &ty)
                    .map_err(invalid("provider configuration"))?;
                Ok::<_, Diagnostics>(configure_provider::Response {
                    diagnostics: diagnostics_to_proto(
                        self.handler
                            .configure_provider(request.terraform_version, config)
                            .await,
                    ),
                })
            }
            .await,
        )
    }

    async fn read_resource(
        &self,
        request: Request<read_resource::Request>,
    ) -> Result<Response<read_resource::Response>, Status> {
        let request = request.into_inner();
        debug!(type_name = %request.type_name, "ReadResource");
        respond(
            async {
                let ty = self.resource_schema(&request.type_name)?.implied_type();
                let current_state = decode_dynamic(request.current_state.as_ref(), &ty)
                    .map_err(invalid("current state"))?;
                let provider_meta = self.provider_meta(request.provider_meta.as_ref())?;
                let response = self
                    .handler
                    .read_resource(ReadResourceRequest {
                        type_name: request.type_name,
                        current_state,
                        private: request.private,
                        provider_meta,
                    })
                    .await;
                Ok::<_, Diagnostics>(read_resource::Response {
                    new_state: encode(&response.new_state, &ty, "new state")?,
                    diagnostics: diagnostics_to_proto(response.diagnostics),
                    private: response.private,
                })
            }
            .await,
        )
    }

    async fn plan_resource_change(
        &self,
        request: Request<plan_resource_change::Request>,
    ) -> Result<Response<plan_resource_change::Response>, Status> {
        let request = request.into_inner();
        debug!(type_name = %request.type_name, "PlanResourceChange");
        respond(
            async {
                let ty = self.resource_schema(&request.type_name)?.implied_type();
                let prior_state = decode_dynamic(request.prior_state.as_ref(), &ty)
                    .map_err(invalid("prior state"))?;
                let proposed_new_state = decode_dynamic(request.proposed_new_state.as_ref(), &ty)
                    .map_err(invalid("proposed new state"))?;
                let config = decode_dynamic(request.config.as_ref(), &ty)
                    .map_err(invalid("resource configuration"))?;
                let provider_meta = self.provider_meta(request.provider_meta.as_ref())?;
                let response = self
                    .handler
                    .plan_resource_change(PlanResourceChangeRequest {
                        type_name: request.type_name,
                        prior_state,
                        proposed_new_state,
                        config,
                        prior_private: request.prior_private,
                        provider_meta,
                    })
                    .await;
                trace!(
                    requires_replace = response.requires_replace.len(),
                    "planned resource change"
                );
                Ok::<_, Diagnostics>(plan_resource_change::Response {
                    planned_state: encode(&response.planned_state, &ty, "planned state")?,
                    requires_replace: response
                        .requires_replace
                        .iter()
                        .map(path_to_proto)
                        .collect(),
                    planned_private: response.planned_private,
                    diagnostics: diagnostics_to_proto(response.diagnostics),
                    legacy_type_system: false,
                })
            }
            .await,
        )
    }

    async fn apply_resource_change(
        &self,
        request: Request<apply_resource_change::Request>,
    ) -> Result<Response<apply_resource_change::Response>, Status> {
        let request = request.into_inner();
        debug!(type_name = %request.type_name, "ApplyResourceChange");
        respond(
            async {
                let ty = self.resource_schema(&request.type_name)?.implied_type();
                let prior_state = decode_dynamic(request.prior_state.as_ref(), &ty)
                    .map_err(invalid("prior state"))?;
                let planned_state = decode_dynamic(request.planned_state.as_ref(), &ty)
                    .map_err(invalid("planned state"))?;
                let config = decode_dynamic(request.config.as_ref(), &ty)
                    .map_err(invalid("resource configuration"))?;
                let provider_meta = self.provider_meta(request.provider_meta.as_ref())?;
                let response = self
                    .handler
                    .apply_resource_change(ApplyResourceChangeRequest {
                        type_name: request.type_name,
                        prior_state,
                        planned_state,
                        config,
                        planned_private: request.planned_private,
                        provider_meta,
                    })
                    .await;
                Ok::<_, Diagnostics>(apply_resource_change::Response {
                    new_state: encode(&response.new_state, &ty, "new state")?,
                    private: response.private,
                    diagnostics: diagnostics_to_proto(response.diagnostics),
                    legacy_type_system: false,
                })
            }
            .await,
        )
    }

    async fn import_resource_state(
        &self,
        request: Request<import_resource_state::Request>,
    ) -> Result<Response<import_resource_state::Response>, Status> {
        let request = request.into_inner();
        debug!(type_name = %request.type_name, id = %request.id, "ImportResourceState");
        respond(
            async {
                self.resource_schema(&request.type_name)?;
                let response = self
                    .handler
                    .import_resource_state(ImportResourceStateRequest {
                        type_name: request.type_name,
                        id: request.id,
                    })
                    .await;
                let mut diagnostics = response.diagnostics;
                let mut imported_resources = Vec::with_capacity(response.imported_resources.len());
                for imported in response.imported_resources {
                    let ty = match self.resource_schema(&imported.type_name) {
                        Ok(schema) => schema.implied_type(),
                        Err(unknown) => {
                            diagnostics.extend(unknown);
                            continue;
                        }
                    };
                    imported_resources.push(import_resource_state::ImportedResource {
                        state: encode(&imported.state, &ty, "imported state")?,
                        type_name: imported.type_name,
                        private: imported.private,
                    });
                }
                Ok::<_, Diagnostics>(import_resource_state::Response {
                    imported_resources,
                    diagnostics: diagnostics_to_proto(diagnostics),
                })
            }
            .await,
        )
    }

    async fn read_data_source(
        &self,
        request: Request<read_data_source::Request>,
    ) -> Result<Response<read_data_source::Response>, Status> {
        let request = request.into_inner();
        debug!(type_name = %request.type_name, "ReadDataSource");
        respond(
            async {
                let ty = self.data_source_schema(&request.type_name)?.implied_type();
                let config = decode_dynamic(request.config.as_ref(), &ty)
                    .map_err(invalid("data source configuration"))?;
                let provider_meta = self.provider_meta(request.provider_meta.as_ref())?;
                let response = self
                    .handler
                    .read_data_source(ReadDataSourceRequest {
                        type_name: request.type_name,
                        config,
                        provider_meta,
                    })
                    .await;
                Ok::<_, Diagnostics>(read_data_source::Response {
                    state: encode(&response.state, &ty, "data source state")?,
                    diagnostics: diagnostics_to_proto(response.diagnostics),
                })
            }
            .await,
        )
    }

    async fn stop_provider(
        &self,
        _request: Request<stop_provider::Request>,
    ) -> Result<Response<stop_provider::Response>, Status> {
        debug!("StopProvider");
        let error = self.handler.stop().await.err().unwrap_or_default();
        Ok(Response::new(stop_provider::Response { error }))
    }
}
