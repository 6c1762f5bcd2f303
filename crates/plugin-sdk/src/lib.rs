//! Runtime for provider plugins: performs the handshake with the host process that launched the
//! plugin and serves a [`ProviderHandler`] over gRPC until the host is done with it.
//!
//! A provider binary typically has nothing in `main` but a call to [`serve`]:
//!
//! ```ignore
//! fn main() -> std::process::ExitCode {
//!     tfplugin_sdk::serve(tfplugin_sdk::ServeOptions::new(provider))
//! }
//! ```

pub mod convert;
mod controller;
pub mod error;
pub mod handler;
pub mod handshake;
mod listener;
mod serve;
mod service;
pub mod tls;

/// Generated protocol bindings
pub mod proto {
    pub mod tfplugin6 {
        tonic::include_proto!("tfplugin6");
    }

    pub mod plugin {
        tonic::include_proto!("plugin");
    }
}

pub use handler::ProviderHandler;
pub use listener::PluginListener;
pub use serve::{run, serve, PluginServer, ServeOptions, DEFAULT_GRACE_PERIOD};
pub use tfplugin_core as core;

pub use crate::error::{ServeError, ServeResult};
