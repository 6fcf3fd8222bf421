//! hostgate Kernel
//!
//! The host process around the dispatcher:
//! - [`bootstrap`]: configuration loading, audit trail, dispatcher assembly
//! - [`rpc`]: JSON-lines transport over any async byte stream
//! - [`telemetry`]: `tracing` subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use hostgate_kernel::{bootstrap, rpc};
//!
//! let config = bootstrap::load_config(Some("/etc/hostgate.toml".as_ref()))?;
//! let dispatcher = bootstrap::build_dispatcher(config).await?;
//! rpc::serve(dispatcher, tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod bootstrap;
pub mod rpc;
pub mod telemetry;

pub use bootstrap::{build_dispatcher, load_config, BootstrapError};
pub use rpc::{handle_line, serve, RpcReply, RpcRequest};
pub use telemetry::TelemetryError;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
