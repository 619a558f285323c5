//! op-mcp-core: config loading, package registry, tool catalog, and
//! argument validation for the MCP gateway.
//!
//! This crate is transport-agnostic — it programs against
//! [`op_mcp_transport::UpstreamClient`] rather than owning any concrete
//! connection — so it has no opinion on OAuth, child processes, or HTTP.

pub mod catalog;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod singleflight;
pub mod validator;

pub use catalog::ToolCatalog;
pub use config::{load_files, resolve_config_paths, LoadResult};
pub use error::{GatewayError, Result, ValidationIssue};
pub use model::{
    AuthConfig, AuthMode, CachedTool, ConnectionStatus, ErrorPayload, HttpKind, MultiToolResult,
    Package, PackageToolCache, Status, Telemetry, Transport, Visibility,
};
pub use registry::PackageRegistry;
pub use singleflight::SingleFlight;
pub use validator::SchemaValidatorCache;
