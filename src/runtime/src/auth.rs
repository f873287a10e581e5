//! Registry credential resolution.
//!
//! Credentials come from an explicit username/password-file pair and from
//! any number of engine credential files (`config.json` with an `auths`
//! section, or the legacy `.dockercfg` layout). An unreadable password file
//! is fatal; unreadable or unrecognizable credential files are skipped.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image_inspector_core::config::InspectionOptions;
use image_inspector_core::error::{InspectorError, Result};
use serde::Deserialize;

/// Registry identifier paired with its secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialEntry {
    pub registry: String,
    pub username: String,
    pub password: String,
    pub email: String,
}

impl CredentialEntry {
    /// Empty credential, used for anonymous pulls.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn basic(
        registry: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            username: username.into(),
            password: password.into(),
            email: String::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// Ordered collection of credentials. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    entries: Vec<CredentialEntry>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding only the anonymous credential.
    pub fn anonymous() -> Self {
        Self {
            entries: vec![CredentialEntry::anonymous()],
        }
    }

    pub fn push(&mut self, entry: CredentialEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CredentialEntry> {
        self.entries.iter()
    }
}

impl Extend<CredentialEntry> for CredentialSet {
    fn extend<T: IntoIterator<Item = CredentialEntry>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

impl<'a> IntoIterator for &'a CredentialSet {
    type Item = &'a CredentialEntry;
    type IntoIter = std::slice::Iter<'a, CredentialEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Build the credential set for one inspection.
///
/// Source order is the username/password-file pair first, then each
/// credential file in the configured order. With no source configured the
/// set holds a single anonymous entry.
pub fn resolve_credentials(opts: &InspectionOptions) -> Result<CredentialSet> {
    if opts.username.is_empty() && opts.docker_cfg.is_empty() {
        return Ok(CredentialSet::anonymous());
    }

    let mut set = CredentialSet::new();

    if !opts.username.is_empty() {
        let path = opts.password_file.as_deref().ok_or_else(|| {
            InspectorError::ConfigError("username given without a password file".to_string())
        })?;
        let password = std::fs::read_to_string(path).map_err(|e| InspectorError::PasswordFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        set.push(CredentialEntry::basic(
            "",
            opts.username.clone(),
            password.trim(),
        ));
    }

    for cfg in &opts.docker_cfg {
        match read_docker_cfg(cfg) {
            Ok(entries) if entries.is_empty() => {
                tracing::warn!(path = %cfg.display(), "No registry credentials found in docker config");
            }
            Ok(entries) => {
                tracing::debug!(path = %cfg.display(), count = entries.len(), "Loaded docker config credentials");
                set.extend(entries);
            }
            Err(e) => {
                tracing::warn!(path = %cfg.display(), error = %e, "Unable to read docker configuration, skipping");
            }
        }
    }

    Ok(set)
}

/// Secret record of one registry inside a credential file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthRecord {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
}

/// Read every recognizable entry from one credential file.
fn read_docker_cfg(path: &Path) -> Result<Vec<CredentialEntry>> {
    let data = std::fs::read_to_string(path)?;
    let root: serde_json::Value = serde_json::from_str(&data)?;
    Ok(parse_docker_cfg(&root))
}

fn parse_docker_cfg(root: &serde_json::Value) -> Vec<CredentialEntry> {
    let registries = match root.get("auths").and_then(|a| a.as_object()) {
        Some(auths) => auths,
        None => match root.as_object() {
            Some(legacy) => legacy,
            None => return Vec::new(),
        },
    };

    registries
        .iter()
        .filter_map(|(registry, value)| {
            let record = AuthRecord::deserialize(value).ok()?;
            entry_from_record(registry, record)
        })
        .collect()
}

fn entry_from_record(registry: &str, record: AuthRecord) -> Option<CredentialEntry> {
    let (username, password) = match (record.auth, record.username, record.password) {
        (Some(auth), _, _) if !auth.is_empty() => decode_auth(&auth)?,
        (_, Some(username), Some(password)) => (username, password),
        _ => return None,
    };

    Some(CredentialEntry {
        registry: registry.to_string(),
        username,
        password,
        email: record.email.unwrap_or_default(),
    })
}

/// Decode a base64 `user:password` pair.
fn decode_auth(auth: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(auth.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn auth(user: &str, pass: &str) -> String {
        STANDARD.encode(format!("{}:{}", user, pass))
    }

    /// Legacy layout with two registries.
    fn dockercfg_two(dir: &TempDir) -> PathBuf {
        let contents = format!(
            r#"{{"https://index.docker.io/v1/": {{"auth": "{}", "email": "a@example.com"}},
                "quay.io": {{"auth": "{}", "email": ""}}}}"#,
            auth("alice", "s3cret"),
            auth("bob", "hunter2")
        );
        write(dir, "dockercfg1", &contents)
    }

    /// Current layout with one registry.
    fn dockercfg_one(dir: &TempDir) -> PathBuf {
        let contents = format!(
            r#"{{"auths": {{"registry.example.com": {{"auth": "{}"}}}}}}"#,
            auth("carol", "pw")
        );
        write(dir, "dockercfg2", &contents)
    }

    #[test]
    fn test_no_sources_yields_default_entry() {
        let set = resolve_credentials(&InspectionOptions::default()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.iter().next().unwrap().is_anonymous());
    }

    #[test]
    fn test_two_credential_files() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.docker_cfg = vec![dockercfg_two(&dir), dockercfg_one(&dir)];

        let set = resolve_credentials(&opts).unwrap();
        let users: Vec<_> = set.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
        assert_eq!(set.iter().next().unwrap().email, "a@example.com");
        assert_eq!(set.iter().last().unwrap().registry, "registry.example.com");
    }

    #[test]
    fn test_username_and_password_file() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.username = "erez".to_string();
        opts.password_file = Some(write(&dir, "passwordFile1", "  topsecret\n"));

        let set = resolve_credentials(&opts).unwrap();
        assert_eq!(set.len(), 1);
        let entry = set.iter().next().unwrap();
        assert_eq!(entry.username, "erez");
        assert_eq!(entry.password, "topsecret");
    }

    #[test]
    fn test_missing_password_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.username = "erez".to_string();
        opts.password_file = Some(dir.path().join("nosuchfile"));

        let err = resolve_credentials(&opts).unwrap_err();
        assert!(matches!(err, InspectorError::PasswordFile { .. }));
    }

    #[test]
    fn test_missing_credential_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.docker_cfg = vec![dockercfg_two(&dir), dir.path().join("nosuchfile")];

        let set = resolve_credentials(&opts).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unparsable_credential_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.docker_cfg = vec![dockercfg_two(&dir), write(&dir, "passwordFile1", "topsecret")];

        let set = resolve_credentials(&opts).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_credential_file_without_auth_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.docker_cfg = vec![
            dockercfg_two(&dir),
            write(&dir, "dockercfg3", r#"{"quay.io": {"email": "nobody@example.com"}}"#),
        ];

        let set = resolve_credentials(&opts).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_all_credential_files_empty_yields_empty_set() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.docker_cfg = vec![dir.path().join("missing")];

        let set = resolve_credentials(&opts).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_sources_concatenate_in_order() {
        let dir = TempDir::new().unwrap();
        let mut opts = InspectionOptions::default();
        opts.username = "erez".to_string();
        opts.password_file = Some(write(&dir, "pass", "pw"));
        opts.docker_cfg = vec![dockercfg_one(&dir), dockercfg_two(&dir)];

        let set = resolve_credentials(&opts).unwrap();
        let users: Vec<_> = set.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(users, vec!["erez", "carol", "alice", "bob"]);
    }

    #[test]
    fn test_explicit_username_password_fields() {
        let root = serde_json::json!({
            "auths": {
                "ghcr.io": {"username": "dave", "password": "token"},
                "bad.example.com": {"auth": "!!!not-base64!!!"},
                "nocolon.example.com": {"auth": STANDARD.encode("justuser")}
            }
        });
        let entries = parse_docker_cfg(&root);
        assert_eq!(entries, vec![CredentialEntry::basic("ghcr.io", "dave", "token")]);
    }

    #[test]
    fn test_non_object_root_has_no_entries() {
        assert!(parse_docker_cfg(&serde_json::json!(["a", "b"])).is_empty());
    }
}
