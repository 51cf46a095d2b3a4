//! Host-facing driver and its configuration.

mod config;
mod runtime;

pub use config::RuntimeConfig;
pub use runtime::Runtime;
