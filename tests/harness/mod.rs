#![allow(dead_code)]

use anyhow::{Context as _, Result};
use tfplugin_core::Schema;
use tfplugin_sdk::ProviderHandler as _;
use tfplugin_test_util::proto::tfplugin6 as pb;
use tfplugin_test_util::values::{dynamic, ensure_no_errors};
use tfplugin_test_util::PluginProcess;
use tonic::transport::Channel;

pub const BIN: &str = env!("CARGO_BIN_EXE_terraform-provider-localfs");

pub const FILE: &str = "localfs_file";

pub type Client = pb::provider_client::ProviderClient<Channel>;

pub async fn start() -> Result<PluginProcess> {
    PluginProcess::spawn(BIN).await
}

/// Schemas as the provider package builds them, for encoding requests locally
pub fn provider_schema() -> Schema {
    tfprovider_localfs::provider().schema().provider
}

pub fn file_schema() -> Schema {
    tfprovider_localfs::provider().schema().resources[FILE].clone()
}

pub fn file_data_source_schema() -> Schema {
    tfprovider_localfs::provider().schema().data_sources[FILE].clone()
}

/// Configure the provider with `root`
pub async fn configure(client: &mut Client, root: &std::path::Path) -> Result<()> {
    let config = tfplugin_core::Value::object([(
        "root",
        tfplugin_core::Value::string(root.to_str().context("root is not UTF-8")?),
    )]);
    let response = client
        .configure_provider(pb::configure_provider::Request {
            terraform_version: "1.9.0".to_string(),
            config: Some(dynamic(&config, &provider_schema())?),
        })
        .await
        .context("failed to call ConfigureProvider")?
        .into_inner();
    ensure_no_errors(&response.diagnostics)?;
    Ok(())
}
