//! Per-package OAuth state: tokens, dynamically-registered client info,
//! and the PKCE code verifier, persisted to `<state-dir>/oauth-tokens/`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Tokens {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Which artifacts to remove on `invalidate` (spec §4.D: four independent
/// scopes so transient PKCE state and persistent secrets are cleaned
/// separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateScope {
    All,
    Tokens,
    Client,
    Verifier,
}

/// Directory layout for persisted OAuth artifacts, with legacy-path
/// migration baked in (`~/.super-mcp/oauth-tokens/` -> the gateway's own
/// state dir) on first read.
pub struct OAuthStore {
    state_dir: PathBuf,
    legacy_dir: Option<PathBuf>,
}

impl OAuthStore {
    pub fn new(state_dir: PathBuf, legacy_dir: Option<PathBuf>) -> Self {
        Self { state_dir, legacy_dir }
    }

    pub fn from_home() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(
            PathBuf::from(format!("{home}/.mcp-gateway")),
            Some(PathBuf::from(format!("{home}/.super-mcp"))),
        )
    }

    fn tokens_dir(&self) -> PathBuf {
        self.state_dir.join("oauth-tokens")
    }

    fn tokens_path(&self, pkg: &str) -> PathBuf {
        self.tokens_dir().join(format!("{pkg}.json"))
    }

    fn client_path(&self, pkg: &str) -> PathBuf {
        self.tokens_dir().join(format!("{pkg}_client.json"))
    }

    fn legacy_tokens_path(&self, pkg: &str) -> Option<PathBuf> {
        self.legacy_dir
            .as_ref()
            .map(|d| d.join("oauth-tokens").join(format!("{pkg}.json")))
    }

    fn migrate_if_needed(&self, pkg: &str) -> Result<()> {
        let target = self.tokens_path(pkg);
        if target.exists() {
            return Ok(());
        }
        if let Some(legacy) = self.legacy_tokens_path(pkg) {
            if legacy.exists() {
                std::fs::create_dir_all(self.tokens_dir())?;
                std::fs::copy(&legacy, &target)
                    .with_context(|| format!("failed to migrate legacy oauth tokens for {pkg}"))?;
                set_restrictive_perms(&target)?;
                info!("migrated legacy OAuth tokens for {pkg} from {}", legacy.display());
            }
        }
        Ok(())
    }

    /// Read tokens for `pkg`. Returns `None` if absent or expired — the
    /// caller triggers refresh or reauth in either case.
    pub fn read_tokens(&self, pkg: &str) -> Result<Option<Tokens>> {
        self.migrate_if_needed(pkg)?;
        let path = self.tokens_path(pkg);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read tokens for {pkg}"))?;
        let tokens: Tokens = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse tokens for {pkg}"))?;
        if tokens.is_expired() {
            return Ok(None);
        }
        Ok(Some(tokens))
    }

    pub fn write_tokens(&self, pkg: &str, tokens: &Tokens) -> Result<()> {
        std::fs::create_dir_all(self.tokens_dir())?;
        let path = self.tokens_path(pkg);
        let content = serde_json::to_string_pretty(tokens)?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write tokens for {pkg}"))?;
        set_restrictive_perms(&path)?;
        Ok(())
    }

    pub fn read_client_info(&self, pkg: &str) -> Result<Option<ClientInfo>> {
        let path = self.client_path(pkg);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn write_client_info(&self, pkg: &str, info: &ClientInfo) -> Result<()> {
        std::fs::create_dir_all(self.tokens_dir())?;
        let path = self.client_path(pkg);
        std::fs::write(&path, serde_json::to_string_pretty(info)?)?;
        set_restrictive_perms(&path)?;
        Ok(())
    }

    pub fn invalidate(&self, pkg: &str, scope: InvalidateScope) -> Result<()> {
        match scope {
            InvalidateScope::All => {
                let _ = std::fs::remove_file(self.tokens_path(pkg));
                let _ = std::fs::remove_file(self.client_path(pkg));
            }
            InvalidateScope::Tokens => {
                let _ = std::fs::remove_file(self.tokens_path(pkg));
            }
            InvalidateScope::Client => {
                let _ = std::fs::remove_file(self.client_path(pkg));
            }
            InvalidateScope::Verifier => {
                // The PKCE verifier lives only in the in-memory flow state
                // (see flow.rs); nothing persisted to remove here, but the
                // scope still exists so callers can express the intent.
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_restrictive_perms(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("failed to set 0600 permissions on {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_restrictive_perms(_path: &Path) -> Result<()> {
    warn!("restrictive file permissions are not enforced on non-unix platforms");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tokens(expired: bool) -> Tokens {
        Tokens {
            access: "access-123".to_string(),
            refresh: Some("refresh-123".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: if expired {
                Utc::now() - chrono::Duration::seconds(10)
            } else {
                Utc::now() + chrono::Duration::seconds(3600)
            },
            scope: None,
        }
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = OAuthStore::new(dir.path().to_path_buf(), None);
        let tokens = make_tokens(false);
        store.write_tokens("pkg1", &tokens).unwrap();

        let read = store.read_tokens("pkg1").unwrap();
        assert!(read.is_some());
        assert_eq!(read.unwrap().access, "access-123");
    }

    #[test]
    fn expired_tokens_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = OAuthStore::new(dir.path().to_path_buf(), None);
        store.write_tokens("pkg1", &make_tokens(true)).unwrap();

        assert!(store.read_tokens("pkg1").unwrap().is_none());
    }

    #[test]
    fn invalidate_all_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = OAuthStore::new(dir.path().to_path_buf(), None);
        store.write_tokens("pkg1", &make_tokens(false)).unwrap();
        store
            .write_client_info(
                "pkg1",
                &ClientInfo {
                    client_id: "cid".to_string(),
                    client_secret: None,
                    extra: serde_json::json!({}),
                },
            )
            .unwrap();

        store.invalidate("pkg1", InvalidateScope::All).unwrap();
        assert!(store.read_tokens("pkg1").unwrap().is_none());
        assert!(store.read_client_info("pkg1").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn written_token_file_has_0600_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = OAuthStore::new(dir.path().to_path_buf(), None);
        store.write_tokens("pkg1", &make_tokens(false)).unwrap();

        let meta = std::fs::metadata(dir.path().join("oauth-tokens/pkg1.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
