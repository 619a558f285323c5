//! op-mcp-gateway: the Gateway Server shell (component J) tying together
//! the Package Registry, Tool Catalog, OAuth subsystem, and Config
//! Watcher from `op-mcp-core`/`op-mcp-oauth`/`op-mcp-transport` behind
//! seven meta-tools exposed over stdio MCP.

pub mod factory;
pub mod help;
pub mod meta_tools;
pub mod server;
pub mod watcher;

pub use factory::OAuthAwareFactory;
pub use meta_tools::dispatch;
pub use server::{meta_tool_schemas, GatewayContext, GatewayState, MetaToolSchema};
pub use watcher::ConfigWatcher;
