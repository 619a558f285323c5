//! op-mcp-transport: upstream client transports for the MCP gateway.
//!
//! Two concrete implementations of the [`traits::UpstreamClient`]
//! capability set:
//!
//! - [`stdio::StdioClient`] spawns the configured command as a child
//!   process and speaks newline-delimited JSON-RPC over its stdin/stdout.
//! - [`http::HttpClient`] speaks Streamable HTTP or legacy HTTP+SSE,
//!   optionally attaching an OAuth bearer token supplied by a
//!   [`http::TokenSource`].

pub mod factory;
pub mod http;
pub mod stdio;
pub mod traits;

pub use factory::DefaultClientFactory;
pub use http::HttpClient;
pub use stdio::StdioClient;
pub use traits::{
    ClientFactory, HealthReport, PackageSpec, Result, ToolDefinition, TransportError,
    TransportKind, UpstreamClient,
};
