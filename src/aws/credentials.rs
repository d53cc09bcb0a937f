//! Shared credentials file
//!
//! Reads the INI-style `~/.aws/credentials` store. Each section is a
//! profile; section order is kept because it decides which profile owns a
//! globally visible resource.

use super::auth::Credentials;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One named profile and its raw key/value fields
#[derive(Debug, Clone, Default)]
struct ProfileSection {
    name: String,
    fields: HashMap<String, String>,
}

/// Ordered, immutable set of profiles
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    path: PathBuf,
    profiles: Vec<ProfileSection>,
}

impl CredentialStore {
    /// Resolve the credentials path: explicit > `AWS_SHARED_CREDENTIALS_FILE` > `~/.aws/credentials`
    pub fn default_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("AWS_SHARED_CREDENTIALS_FILE") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        dirs::home_dir()
            .map(|home| home.join(".aws").join("credentials"))
            .ok_or_else(|| Error::config("cannot locate home directory for ~/.aws/credentials"))
    }

    /// Load the store from disk
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::default_path(explicit)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!(
                "cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut store = Self::parse(&content);
        store.path = path;
        tracing::debug!(
            path = %store.path.display(),
            profiles = store.profiles.len(),
            "loaded credentials"
        );
        Ok(store)
    }

    /// Parse INI content. Repeated sections merge into the first occurrence.
    pub fn parse(content: &str) -> Self {
        let mut profiles: Vec<ProfileSection> = Vec::new();
        let mut current: Option<usize> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = section.trim();
                let name = name.strip_prefix("profile ").unwrap_or(name).trim();
                current = match profiles.iter().position(|p| p.name == name) {
                    Some(idx) => Some(idx),
                    None => {
                        profiles.push(ProfileSection {
                            name: name.to_string(),
                            fields: HashMap::new(),
                        });
                        Some(profiles.len() - 1)
                    }
                };
                continue;
            }

            let Some(idx) = current else {
                continue;
            };
            if let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) {
                profiles[idx]
                    .fields
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Self {
            path: PathBuf::new(),
            profiles,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Profile names in file order
    pub fn profiles(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.clone()).collect()
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.section(profile).is_some()
    }

    fn section(&self, profile: &str) -> Option<&ProfileSection> {
        self.profiles.iter().find(|p| p.name == profile)
    }

    fn field(&self, profile: &str, key: &str) -> Option<&str> {
        self.section(profile)?
            .fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn access_key_id(&self, profile: &str) -> Option<&str> {
        self.field(profile, "aws_access_key_id")
    }

    pub fn secret_access_key(&self, profile: &str) -> Option<&str> {
        self.field(profile, "aws_secret_access_key")
    }

    pub fn session_token(&self, profile: &str) -> Option<&str> {
        self.field(profile, "aws_session_token")
    }

    /// Account id recorded alongside the keys
    pub fn owner_id(&self, profile: &str) -> Option<&str> {
        self.field(profile, "owner_id")
    }

    /// Key pair for a profile, or a configuration error naming what is missing
    pub fn credentials(&self, profile: &str) -> Result<Credentials> {
        if !self.contains(profile) {
            return Err(Error::config(format!(
                "profile '{}' not found in credentials file",
                profile
            )));
        }
        let access_key_id = self.access_key_id(profile).ok_or_else(|| {
            Error::config(format!("profile '{}' has no aws_access_key_id", profile))
        })?;
        let secret_access_key = self.secret_access_key(profile).ok_or_else(|| {
            Error::config(format!("profile '{}' has no aws_secret_access_key", profile))
        })?;
        Ok(Credentials::new(
            access_key_id,
            secret_access_key,
            self.session_token(profile),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# shared credentials
[default]
aws_access_key_id = AKIADEFAULT
aws_secret_access_key = secret-default

[prod]
aws_access_key_id=AKIAPROD
aws_secret_access_key=secret-prod
owner_id = 111122223333

; partially configured
[staging]
aws_access_key_id = AKIASTAGING
"#;

    #[test]
    fn test_profiles_keep_file_order() {
        let store = CredentialStore::parse(SAMPLE);
        assert_eq!(store.profiles(), vec!["default", "prod", "staging"]);
    }

    #[test]
    fn test_field_accessors() {
        let store = CredentialStore::parse(SAMPLE);
        assert_eq!(store.access_key_id("prod"), Some("AKIAPROD"));
        assert_eq!(store.secret_access_key("prod"), Some("secret-prod"));
        assert_eq!(store.owner_id("prod"), Some("111122223333"));
        assert_eq!(store.owner_id("default"), None);
        assert_eq!(store.access_key_id("missing"), None);
    }

    #[test]
    fn test_credentials_require_both_keys() {
        let store = CredentialStore::parse(SAMPLE);
        let creds = store.credentials("default").unwrap();
        assert_eq!(creds.access_key_id, "AKIADEFAULT");
        assert!(creds.session_token.is_none());

        let err = store.credentials("staging").unwrap_err();
        assert!(err.to_string().contains("aws_secret_access_key"));
        assert!(store.credentials("nope").is_err());
    }

    #[test]
    fn test_repeated_section_merges() {
        let store = CredentialStore::parse(
            "[a]\naws_access_key_id = one\n[b]\nx = y\n[a]\naws_secret_access_key = two\n",
        );
        assert_eq!(store.profiles(), vec!["a", "b"]);
        assert!(store.credentials("a").is_ok());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = CredentialStore::load(Some(Path::new("/nonexistent/fleetscan/credentials")))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = CredentialStore::load(Some(&path)).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.profiles().len(), 3);
    }
}
