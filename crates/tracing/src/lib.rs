//! Logging for plugin processes.
//!
//! A plugin's stdout is reserved for the handshake with its host, so everything here writes to
//! stderr, by default in the JSON line format the host knows how to parse and re-emit.

pub mod hclog;
mod traces;

pub use traces::{configure_tracing, FlushGuard, LogFormat};
