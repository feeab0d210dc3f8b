//! On-disk persistence for one server's OAuth artifacts.
//!
//! Layout: `<token_cache_dir>/<server-name>/` with one file per artifact
//! (`tokens.json`, `client.json`, `verifier`, `state`), written with
//! owner-only permissions.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

const TOKENS_FILE: &str = "tokens.json";
const CLIENT_FILE: &str = "client.json";
const VERIFIER_FILE: &str = "verifier";
const STATE_FILE: &str = "state";

/// Access tokens are treated as stale slightly before their advertised
/// expiry so a token does not die mid-request.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Client credentials from dynamic registration (RFC 7591). Servers return
/// more fields than we consume; the extras ride along untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredClientInfo {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Client,
    Tokens,
    Verifier,
}

#[derive(Debug, Clone)]
pub struct TokenVault {
    dir: PathBuf,
}

impl TokenVault {
    pub fn new(token_cache_dir: &Path, server_name: &str) -> Self {
        Self {
            dir: token_cache_dir.join(server_name),
        }
    }

    /// Human-readable location for log lines.
    pub fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    pub fn read_tokens(&self) -> Option<StoredTokens> {
        let raw = fs::read_to_string(self.dir.join(TOKENS_FILE)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save_tokens(&self, tokens: &StoredTokens) -> Result<()> {
        let json = serde_json::to_string_pretty(tokens)?;
        self.write_private(TOKENS_FILE, json.as_bytes())
    }

    pub fn read_client_info(&self) -> Option<StoredClientInfo> {
        let raw = fs::read_to_string(self.dir.join(CLIENT_FILE)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save_client_info(&self, info: &StoredClientInfo) -> Result<()> {
        let json = serde_json::to_string_pretty(info)?;
        self.write_private(CLIENT_FILE, json.as_bytes())
    }

    pub fn read_code_verifier(&self) -> Option<String> {
        let raw = fs::read_to_string(self.dir.join(VERIFIER_FILE)).ok()?;
        let trimmed = raw.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn save_code_verifier(&self, verifier: &str) -> Result<()> {
        self.write_private(VERIFIER_FILE, verifier.as_bytes())
    }

    pub fn read_state(&self) -> Option<String> {
        let raw = fs::read_to_string(self.dir.join(STATE_FILE)).ok()?;
        let trimmed = raw.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn save_state(&self, state: &str) -> Result<()> {
        self.write_private(STATE_FILE, state.as_bytes())
    }

    /// Delete exactly the artifacts implied by `scope` and nothing else.
    pub fn clear(&self, scope: ClearScope) -> Result<()> {
        let files: &[&str] = match scope {
            ClearScope::All => &[TOKENS_FILE, CLIENT_FILE, VERIFIER_FILE, STATE_FILE],
            ClearScope::Client => &[CLIENT_FILE],
            ClearScope::Tokens => &[TOKENS_FILE],
            ClearScope::Verifier => &[VERIFIER_FILE],
        };
        for file in files {
            match fs::remove_file(self.dir.join(file)) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(error).with_context(|| format!("failed to remove {file}"));
                }
            }
        }
        Ok(())
    }

    /// A non-expired access token, if one is persisted. Expiry is judged by
    /// `expires_in` relative to the mtime of `tokens.json`; tokens without
    /// an advertised lifetime never expire here.
    pub fn read_cached_access_token(&self) -> Option<String> {
        let tokens = self.read_tokens()?;
        let Some(expires_in) = tokens.expires_in else {
            return Some(tokens.access_token);
        };

        let mtime = fs::metadata(self.dir.join(TOKENS_FILE))
            .and_then(|meta| meta.modified())
            .ok()?;
        let age = SystemTime::now().duration_since(mtime).unwrap_or_default();
        let lifetime = Duration::from_secs(expires_in).saturating_sub(EXPIRY_MARGIN);
        (age < lifetime).then_some(tokens.access_token)
    }

    fn write_private(&self, file: &str, contents: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.describe()))?;

        let path = self.dir.join(file);
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut handle = options
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        handle
            .write_all(contents)
            .with_context(|| format!("failed to write {}", path.display()))?;

        // The mode on OpenOptions only applies to newly created files.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}
