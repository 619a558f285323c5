//! op-mcp-oauth: OAuth authorization-code-with-PKCE subsystem for the MCP
//! gateway.
//!
//! Scope: the narrow but common case of upstream MCP servers that require
//! interactive browser sign-in. Provides:
//!
//! - a process-wide, shared loopback callback listener ([`callback`])
//! - a global per-package flow lock preventing duplicate browser flows ([`lock`])
//! - file-backed token/client-info persistence with `0600` permissions ([`state`])
//! - the PKCE flow driver itself, built on the `oauth2` crate ([`flow`])
//! - [`manager::OAuthManager`], the entry point tying the above together.

pub mod callback;
pub mod flow;
pub mod lock;
pub mod manager;
pub mod state;

pub use callback::{CallbackListener, CallbackOutcome, DEFAULT_PORT};
pub use flow::FlowConfig;
pub use lock::{AcquireOutcome, GlobalOAuthLock};
pub use manager::{AuthOutcome, OAuthManager};
pub use state::{ClientInfo, InvalidateScope, OAuthStore, Tokens};
