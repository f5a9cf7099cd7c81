//! Provider credential validation (§4.5.3) against the per-user
//! `opencode/auth.json` store.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::AgentRuntimeError;

/// Providers that run without a stored credential entry.
const EXEMPT_PROVIDERS: &[&str] = &["zen", "opencode"];

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

impl CredentialEntry {
    fn secret(&self) -> Option<&str> {
        self.token
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.key.as_deref().filter(|s| !s.is_empty()))
    }
}

fn load_credentials(auth_path: &Path) -> Result<HashMap<String, serde_json::Value>, AgentRuntimeError> {
    if !auth_path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(auth_path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Validate that `provider_id` has a usable credential entry.
///
/// `zen` and `opencode` never require one. Every other provider must have
/// a present entry with a non-empty `token`/`key` field.
pub fn validate_provider_credentials(auth_path: &Path, provider_id: &str) -> Result<(), AgentRuntimeError> {
    if EXEMPT_PROVIDERS.contains(&provider_id) {
        return Ok(());
    }

    let entries = load_credentials(auth_path)?;
    let raw = entries
        .get(provider_id)
        .ok_or_else(|| AgentRuntimeError::CredentialMissing(provider_id.to_string()))?;

    let entry: CredentialEntry = serde_json::from_value(raw.clone())
        .map_err(|e| AgentRuntimeError::CredentialMalformed(provider_id.to_string(), e.to_string()))?;

    match entry.secret() {
        Some(_) => Ok(()),
        None => Err(AgentRuntimeError::CredentialMissing(provider_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exempt_providers_skip_credential_lookup() {
        let path = Path::new("/nonexistent/auth.json");
        assert!(validate_provider_credentials(path, "zen").is_ok());
        assert!(validate_provider_credentials(path, "opencode").is_ok());
    }

    #[test]
    fn missing_file_is_missing_credential_for_other_providers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let err = validate_provider_credentials(&path, "anthropic").unwrap_err();
        assert!(matches!(err, AgentRuntimeError::CredentialMissing(p) if p == "anthropic"));
    }

    #[test]
    fn missing_entry_for_provider_is_credential_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, r#"{"openai": {"token": "sk-abc"}}"#).unwrap();
        let err = validate_provider_credentials(&path, "anthropic").unwrap_err();
        assert!(matches!(err, AgentRuntimeError::CredentialMissing(_)));
    }

    #[test]
    fn present_token_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, r#"{"anthropic": {"token": "sk-abc"}}"#).unwrap();
        validate_provider_credentials(&path, "anthropic").unwrap();
    }

    #[test]
    fn empty_token_is_credential_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, r#"{"anthropic": {"token": ""}}"#).unwrap();
        let err = validate_provider_credentials(&path, "anthropic").unwrap_err();
        assert!(matches!(err, AgentRuntimeError::CredentialMissing(_)));
    }

    #[test]
    fn malformed_entry_is_credential_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, r#"{"anthropic": "not-an-object"}"#).unwrap();
        let err = validate_provider_credentials(&path, "anthropic").unwrap_err();
        assert!(matches!(err, AgentRuntimeError::CredentialMalformed(_, _)));
    }
}
