//! This crate contains utilities for testing provider plugins from the side of the host that
//! launches them.
//!
//! ```rust,ignore
//! use tfplugin_test_util::PluginProcess;
//!
//! # async fn quickstart() -> anyhow::Result<()> {
//! let plugin = PluginProcess::spawn(env!("CARGO_BIN_EXE_terraform-provider-localfs")).await?;
//! let mut client = plugin.provider_client().await?;
//! // ... issue `tfplugin6` requests
//! let status = plugin.shutdown().await?;
//! assert!(status.success());
//! # Ok(())
//! # }
//! ```

pub mod plugin;
pub mod values;

pub use tfplugin_sdk::proto;

pub use crate::plugin::PluginProcess;
