//! hostgate Core
//!
//! The capability surface of the host:
//! - [`Capability`]: the closed set of whitelisted operations
//! - [`CapabilityRegistry`]: name, required role, input schema, description
//! - [`Dispatcher`]: lookup, authorization, validation, audited execution
//! - [`HostConfig`]: configuration injected into every invocation
//!
//! # Example
//!
//! ```rust,ignore
//! use hostgate_core::{Dispatcher, HostConfig, HostServices};
//!
//! # async fn example(audit: hostgate_audit::AuditLogger) -> Result<(), Box<dyn std::error::Error>> {
//! let services = HostServices::with_cli_drivers(HostConfig::from_file("/etc/hostgate.toml".as_ref())?)?;
//! let dispatcher = Dispatcher::new(services, audit)?;
//!
//! let response = dispatcher
//!     .dispatch("observer", "apps.list", serde_json::json!({}))
//!     .await;
//! assert!(response.ok);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod capability;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
mod handlers;
pub mod registry;
pub mod response;
pub mod schema;

pub use capability::Capability;
pub use config::{BinaryPaths, ConfigError, HostConfig, LoggingConfig, ENV_PREFIX};
pub use context::{ExecutionContext, HostServices};
pub use dispatcher::Dispatcher;
pub use error::CapabilityError;
pub use registry::{CapabilityDescriptor, CapabilityRegistry, CapabilitySummary};
pub use response::{CapabilityOutput, DispatchResponse, Handled, ResponseError};
pub use schema::{InputSchema, SchemaError, SchemaViolation};

pub use hostgate_release::{ErrorCode, ReleaseEnvelope};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with hostgate Core
    pub use crate::{
        Capability, CapabilityRegistry, DispatchResponse, Dispatcher, ExecutionContext, HostConfig,
        HostServices,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
