//! OAuth-aware [`ClientFactory`]: the gateway's own wiring on top of
//! [`op_mcp_transport::DefaultClientFactory`] that attaches a live
//! [`TokenSource`] backed by the OAuth subsystem whenever a package
//! declares `oauth: true`, per spec §4.C ("if an OAuth token is already
//! persisted for this package, attach the OAuth provider to the
//! transport before connecting").

use op_mcp_oauth::{OAuthManager, Tokens};
use op_mcp_transport::http::{HttpKind as TransportHttpKind, TokenSource};
use op_mcp_transport::{ClientFactory, HttpClient, PackageSpec, StdioClient, TransportError, TransportKind, UpstreamClient};
use std::sync::Arc;

struct OAuthTokenSource {
    oauth: Arc<OAuthManager>,
    package_id: String,
}

impl TokenSource for OAuthTokenSource {
    fn current(&self) -> Option<Tokens> {
        self.oauth.tokens(&self.package_id).unwrap_or_default()
    }
}

pub struct OAuthAwareFactory {
    oauth: Arc<OAuthManager>,
}

impl OAuthAwareFactory {
    pub fn new(oauth: Arc<OAuthManager>) -> Self {
        Self { oauth }
    }
}

impl ClientFactory for OAuthAwareFactory {
    fn build(&self, spec: &PackageSpec) -> Result<Arc<dyn UpstreamClient>, TransportError> {
        match spec.transport {
            TransportKind::Stdio => {
                let command = spec
                    .command
                    .clone()
                    .ok_or_else(|| TransportError::Other("stdio package missing command".to_string()))?;
                Ok(Arc::new(StdioClient::new(
                    command,
                    spec.args.clone(),
                    spec.env.clone(),
                    spec.cwd.clone(),
                )))
            }
            TransportKind::Http => {
                let base_url = spec
                    .base_url
                    .clone()
                    .ok_or_else(|| TransportError::Other("http package missing base_url".to_string()))?;
                let token_source: Option<Arc<dyn TokenSource>> = if spec.oauth {
                    Some(Arc::new(OAuthTokenSource {
                        oauth: self.oauth.clone(),
                        package_id: spec.id.clone(),
                    }))
                } else {
                    None
                };
                let kind = match spec.http_kind {
                    TransportHttpKind::Sse => TransportHttpKind::Sse,
                    TransportHttpKind::Streamable => TransportHttpKind::Streamable,
                };
                let client = HttpClient::new(base_url, kind, spec.extra_headers.clone(), token_source)?;
                Ok(Arc::new(client))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_mcp_oauth::OAuthStore;
    use std::collections::HashMap;

    #[test]
    fn stdio_packages_ignore_oauth_manager() {
        let store = OAuthStore::new(tempfile::tempdir().unwrap().path().to_path_buf(), None);
        let factory = OAuthAwareFactory::new(Arc::new(OAuthManager::new(store)));
        let spec = PackageSpec {
            id: "pkg".to_string(),
            transport: TransportKind::Stdio,
            command: Some("echo".to_string()),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            base_url: None,
            http_kind: TransportHttpKind::Streamable,
            extra_headers: vec![],
            oauth: false,
        };
        assert!(factory.build(&spec).is_ok());
    }
}
