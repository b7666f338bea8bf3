//! Tenant credential storage.
//!
//! Generated credentials (database passwords) are handed to a write-only
//! [`SecretStore`]. The default store encrypts them with the `age` binary to
//! every recipient listed in `keys.yaml`.
//!
//! Layout:
//!   .provision/secrets/
//!     keys.yaml                     age recipients (public keys, safe to commit)
//!     tenants/<namespace>/<name>.age  encrypted KEY=VALUE credentials

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ClientError, ProvisionError, Result};
use crate::exec::{self, CommandSpec};
use crate::io;
use crate::paths;

pub trait SecretStore {
    /// Store `values` under `namespace/name`, replacing any previous value.
    fn put(
        &self,
        namespace: &str,
        name: &str,
        values: &BTreeMap<String, String>,
    ) -> std::result::Result<(), ClientError>;
}

// ---------------------------------------------------------------------------
// Recipients
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Ssh,
    Age,
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Ssh => write!(f, "ssh"),
            KeyType::Age => write!(f, "age"),
        }
    }
}

impl KeyType {
    /// Native age keys start with `age1`; everything else is treated as SSH.
    pub fn infer(public_key: &str) -> Self {
        if public_key.trim().starts_with("age1") {
            KeyType::Age
        } else {
            KeyType::Ssh
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub public_key: String,
    pub added_at: DateTime<Utc>,
}

impl Recipient {
    /// Last 8 characters of the key material, for listings.
    pub fn short_id(&self) -> String {
        let key = self.public_key.trim();
        let material = key.split_whitespace().nth(1).unwrap_or(key);
        if material.len() >= 8 {
            format!("\u{2026}{}", &material[material.len() - 8..])
        } else {
            material.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct KeysFile {
    #[serde(default)]
    keys: Vec<Recipient>,
}

fn load_keys(root: &Path) -> Result<KeysFile> {
    let path = paths::secrets_keys_path(root);
    if !path.exists() {
        return Ok(KeysFile::default());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn save_keys(root: &Path, keys: &KeysFile) -> Result<()> {
    let content = serde_yaml::to_string(keys)?;
    io::atomic_write(&paths::secrets_keys_path(root), content.as_bytes())
}

pub fn list_keys(root: &Path) -> Result<Vec<Recipient>> {
    Ok(load_keys(root)?.keys)
}

pub fn add_key(root: &Path, name: &str, public_key: &str) -> Result<Recipient> {
    paths::validate_slug("key name", name)?;
    let public_key = public_key.trim();
    if public_key.is_empty() {
        return Err(ProvisionError::Validation("public key is empty".to_string()));
    }
    let mut file = load_keys(root)?;
    if file.keys.iter().any(|k| k.name == name) {
        return Err(ProvisionError::Validation(format!(
            "secret key '{name}' already exists"
        )));
    }
    let recipient = Recipient {
        name: name.to_string(),
        key_type: KeyType::infer(public_key),
        public_key: public_key.to_string(),
        added_at: Utc::now(),
    };
    file.keys.push(recipient.clone());
    save_keys(root, &file)?;
    Ok(recipient)
}

pub fn remove_key(root: &Path, name: &str) -> Result<()> {
    let mut file = load_keys(root)?;
    let before = file.keys.len();
    file.keys.retain(|k| k.name != name);
    if file.keys.len() == before {
        return Err(ProvisionError::Validation(format!(
            "secret key '{name}' not found"
        )));
    }
    save_keys(root, &file)
}

/// Names of the credentials stored for `namespace`, sorted.
pub fn stored_names(root: &Path, namespace: &str) -> Result<Vec<String>> {
    let dir = paths::tenant_secrets_dir(root, namespace);
    io::list_stems(&dir, "age")
}

// ---------------------------------------------------------------------------
// age-backed store
// ---------------------------------------------------------------------------

pub struct AgeSecretStore {
    root: PathBuf,
    age: Option<PathBuf>,
    timeout: Duration,
}

impl AgeSecretStore {
    pub fn new(root: &Path, timeout: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            age: None,
            timeout,
        }
    }

    /// Use a specific `age` binary instead of the one on PATH.
    pub fn with_binary(mut self, age: Option<PathBuf>) -> Self {
        self.age = age;
        self
    }
}

impl SecretStore for AgeSecretStore {
    fn put(
        &self,
        namespace: &str,
        name: &str,
        values: &BTreeMap<String, String>,
    ) -> std::result::Result<(), ClientError> {
        let label = format!("store secret {namespace}/{name}");
        let keys = load_keys(&self.root)
            .map_err(|e| ClientError::permanent(&label, e.to_string()))?
            .keys;
        if keys.is_empty() {
            return Err(ClientError::permanent(
                &label,
                "no recipients configured; add one with `provision secrets keys add`",
            ));
        }
        let age = exec::find_program("age", self.age.as_deref())?;

        let recipients = keys
            .iter()
            .map(|k| k.public_key.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let tmp = tempfile::NamedTempFile::new()
            .map_err(|e| ClientError::permanent(&label, e.to_string()))?;
        std::fs::write(tmp.path(), recipients.as_bytes())
            .map_err(|e| ClientError::permanent(&label, e.to_string()))?;

        let out_path = paths::tenant_secret_path(&self.root, namespace, name);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::permanent(&label, e.to_string()))?;
        }

        let spec = CommandSpec::new(age, &label, self.timeout)
            .arg("--encrypt")
            .arg("--recipients-file")
            .arg(tmp.path().to_string_lossy())
            .arg("--output")
            .arg(out_path.to_string_lossy())
            .stdin(env_content(values));
        exec::run(&spec)?;
        info!("stored credentials {namespace}/{name}");
        Ok(())
    }
}

/// Stand-in used when `secrets.enabled` is false: credentials are dropped.
pub struct DiscardSecretStore;

impl SecretStore for DiscardSecretStore {
    fn put(
        &self,
        namespace: &str,
        name: &str,
        _values: &BTreeMap<String, String>,
    ) -> std::result::Result<(), ClientError> {
        warn!("secret store disabled; credentials {namespace}/{name} were not persisted");
        Ok(())
    }
}

/// KEY=VALUE lines, keys in sorted order.
fn env_content(values: &BTreeMap<String, String>) -> String {
    values.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
}
