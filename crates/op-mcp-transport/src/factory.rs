//! Default [`ClientFactory`]: builds stdio clients directly and HTTP
//! clients with no token source. A gateway wiring OAuth-enabled packages
//! supplies its own factory that attaches a live [`crate::http::TokenSource`]
//! instead of using this one for `oauth: true` packages.

use crate::http::HttpClient;
use crate::stdio::StdioClient;
use crate::traits::{ClientFactory, PackageSpec, TransportError, TransportKind, UpstreamClient};
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClientFactory;

impl ClientFactory for DefaultClientFactory {
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
                let token_source = None;
                let client = HttpClient::new(base_url, spec.http_kind, spec.extra_headers.clone(), token_source)?;
                Ok(Arc::new(client))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn builds_stdio_client_from_spec() {
        let spec = PackageSpec {
            id: "pkg".to_string(),
            transport: TransportKind::Stdio,
            command: Some("echo".to_string()),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            base_url: None,
            http_kind: crate::http::HttpKind::Streamable,
            extra_headers: vec![],
            oauth: false,
        };
        let factory = DefaultClientFactory;
        assert!(factory.build(&spec).is_ok());
    }

    #[test]
    fn http_without_base_url_errors() {
        let spec = PackageSpec {
            id: "pkg".to_string(),
            transport: TransportKind::Http,
            command: None,
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            base_url: None,
            http_kind: crate::http::HttpKind::Streamable,
            extra_headers: vec![],
            oauth: false,
        };
        let factory = DefaultClientFactory;
        assert!(factory.build(&spec).is_err());
    }
}
