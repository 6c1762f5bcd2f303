//! The interface a provider implements to be served by this runtime

use std::collections::HashMap;

use async_trait::async_trait;
use tfplugin_core::{AttributePath, Diagnostics, ProviderSchema, Value};

/// State stored by the host before it was handed to [`ProviderHandler::upgrade_resource_state`].
/// The host does not know the schema the state was written with, so it is passed on undecoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawState {
    /// JSON as written by any recent host
    pub json: Option<Vec<u8>>,
    /// Legacy flattened `key.0.attr = value` state
    pub flatmap: HashMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct UpgradeResourceStateRequest {
    pub type_name: String,
    /// Schema version the state was written with
    pub version: i64,
    pub raw_state: RawState,
}

#[derive(Clone, Debug, Default)]
pub struct UpgradeResourceStateResponse {
    /// State conforming to the current schema
    pub upgraded_state: Value,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug, Default)]
pub struct ReadResourceRequest {
    pub type_name: String,
    pub current_state: Value,
    pub private: Vec<u8>,
    pub provider_meta: Value,
}

#[derive(Clone, Debug, Default)]
pub struct ReadResourceResponse {
    /// Null when the remote object no longer exists
    pub new_state: Value,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug, Default)]
pub struct PlanResourceChangeRequest {
    pub type_name: String,
    /// Null when the resource is being created
    pub prior_state: Value,
    /// Null when the resource is being destroyed
    pub proposed_new_state: Value,
    pub config: Value,
    pub prior_private: Vec<u8>,
    pub provider_meta: Value,
}

#[derive(Clone, Debug, Default)]
pub struct PlanResourceChangeResponse {
    pub planned_state: Value,
    /// Attributes whose change can only be applied by replacing the object
    pub requires_replace: Vec<AttributePath>,
    pub planned_private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug, Default)]
pub struct ApplyResourceChangeRequest {
    pub type_name: String,
    pub prior_state: Value,
    /// Null when the resource is being destroyed
    pub planned_state: Value,
    pub config: Value,
    pub planned_private: Vec<u8>,
    pub provider_meta: Value,
}

#[derive(Clone, Debug, Default)]
pub struct ApplyResourceChangeResponse {
    pub new_state: Value,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug, Default)]
pub struct ImportResourceStateRequest {
    pub type_name: String,
    /// The user supplied import ID
    pub id: String,
}

#[derive(Clone, Debug, Default)]
pub struct ImportedResource {
    pub type_name: String,
    pub state: Value,
    pub private: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct ImportResourceStateResponse {
    pub imported_resources: Vec<ImportedResource>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug, Default)]
pub struct ReadDataSourceRequest {
    pub type_name: String,
    pub config: Value,
    pub provider_meta: Value,
}

#[derive(Clone, Debug, Default)]
pub struct ReadDataSourceResponse {
    pub state: Value,
    pub diagnostics: Diagnostics,
}

/// A provider as seen by the runtime.
///
/// All values are already decoded against the schema returned by [`ProviderHandler::schema`],
/// which is requested once when serving starts. Calls may arrive concurrently.
#[async_trait]
pub trait ProviderHandler: Send + Sync + 'static {
    fn schema(&self) -> ProviderSchema;

    async fn validate_provider_config(&self, _config: Value) -> Diagnostics {
        Diagnostics::new()
    }

    /// Called once before any resource or data source operation
    async fn configure_provider(&self, terraform_version: String, config: Value) -> Diagnostics;

    async fn validate_resource_config(&self, _type_name: &str, _config: Value) -> Diagnostics {
        Diagnostics::new()
    }

    async fn validate_data_resource_config(
        &self,
        _type_name: &str,
        _config: Value,
    ) -> Diagnostics {
        Diagnostics::new()
    }

    async fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
    ) -> UpgradeResourceStateResponse;

    async fn read_resource(&self, request: ReadResourceRequest) -> ReadResourceResponse;

    async fn plan_resource_change(
        &self,
        request: PlanResourceChangeRequest,
    ) -> PlanResourceChangeResponse;

    async fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest,
    ) -> ApplyResourceChangeResponse;

    async fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse;

    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse;

    /// Asks in-flight operations to wrap up. An error is reported back to the host verbatim.
    async fn stop(&self) -> Result<(), String> {
        Ok(())
    }
}
