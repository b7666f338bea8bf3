//! Desired-state ledger read by the reconciliation controller.
//!
//! The ledger is a set of tenants keyed by domain. Registering a domain that
//! is already active is a no-op, so a re-run never duplicates an entry.
//! Removal only sets `removed_at`; the controller decides what that means.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ProvisionError, Result};
use crate::io;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub domain: String,
    pub namespace: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }
}

pub trait LedgerStore {
    /// Ensure `domain` is active. Returns true when the ledger changed.
    fn register(&self, domain: &str, namespace: &str) -> Result<bool>;

    /// Mark `domain` removed. Returns false when it was not active.
    fn deregister(&self, domain: &str) -> Result<bool>;

    /// All entries, in registration order.
    fn entries(&self) -> Result<Vec<LedgerEntry>>;

    fn active_domains(&self) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(LedgerEntry::is_active)
            .map(|e| e.domain)
            .collect())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    tenants: Vec<LedgerEntry>,
}

/// YAML ledger file. Read-modify-write cycles hold an exclusive lock on a
/// sibling `.lock` file, and writes are atomic.
pub struct YamlLedger {
    path: PathBuf,
}

fn ledger_err(e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::Registration(e.to_string())
}

impl YamlLedger {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<LedgerFile> {
        if !self.path.exists() {
            return Ok(LedgerFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(ledger_err)?;
        if data.trim().is_empty() {
            return Ok(LedgerFile::default());
        }
        serde_yaml::from_str(&data)
            .map_err(|e| ledger_err(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, file: &LedgerFile) -> Result<()> {
        let data = serde_yaml::to_string(file).map_err(ledger_err)?;
        io::atomic_write(&self.path, data.as_bytes()).map_err(ledger_err)
    }

    /// Run `f` on the loaded ledger under the lock, saving when it reports a change.
    fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut LedgerFile) -> bool,
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(ledger_err)?;
        }
        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path.with_extension("lock"))
            .map_err(ledger_err)?;
        lock.lock_exclusive().map_err(ledger_err)?;

        let result = self.load().and_then(|mut file| {
            let changed = f(&mut file);
            if changed {
                self.save(&file)?;
            }
            Ok(changed)
        });
        let _ = lock.unlock();
        result
    }
}

impl LedgerStore for YamlLedger {
    fn register(&self, domain: &str, namespace: &str) -> Result<bool> {
        let changed = self.update(|file| {
            match file.tenants.iter_mut().find(|e| e.domain == domain) {
                Some(entry) if entry.is_active() && entry.namespace == namespace => false,
                Some(entry) => {
                    entry.namespace = namespace.to_string();
                    entry.removed_at = None;
                    entry.registered_at = Utc::now();
                    true
                }
                None => {
                    file.tenants.push(LedgerEntry {
                        domain: domain.to_string(),
                        namespace: namespace.to_string(),
                        registered_at: Utc::now(),
                        removed_at: None,
                    });
                    true
                }
            }
        })?;
        if changed {
            info!("registered {domain} in {}", self.path.display());
        }
        Ok(changed)
    }

    fn deregister(&self, domain: &str) -> Result<bool> {
        self.update(|file| match file.tenants.iter_mut().find(|e| e.domain == domain) {
            Some(entry) if entry.is_active() => {
                entry.removed_at = Some(Utc::now());
                true
            }
            _ => false,
        })
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.load()?.tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger(dir: &TempDir) -> YamlLedger {
        YamlLedger::new(&dir.path().join(".provision/ledger.yaml"))
    }

    #[test]
    fn register_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let l = ledger(&dir);
        assert!(l.register("test1.example.org", "test1").unwrap());
        assert!(!l.register("test1.example.org", "test1").unwrap());
        assert_eq!(l.active_domains().unwrap(), vec!["test1.example.org"]);
        assert_eq!(l.entries().unwrap().len(), 1);
    }

    #[test]
    fn keeps_registration_order() {
        let dir = TempDir::new().unwrap();
        let l = ledger(&dir);
        l.register("zeta.example.org", "zeta").unwrap();
        l.register("alpha.example.org", "alpha").unwrap();
        assert_eq!(
            l.active_domains().unwrap(),
            vec!["zeta.example.org", "alpha.example.org"]
        );
    }

    #[test]
    fn deregister_then_register_reactivates() {
        let dir = TempDir::new().unwrap();
        let l = ledger(&dir);
        l.register("test1.example.org", "test1").unwrap();
        assert!(l.deregister("test1.example.org").unwrap());
        assert!(!l.deregister("test1.example.org").unwrap());
        assert!(l.active_domains().unwrap().is_empty());
        assert_eq!(l.entries().unwrap().len(), 1);

        assert!(l.register("test1.example.org", "test1").unwrap());
        let entries = l.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_active());
    }

    #[test]
    fn corrupt_ledger_is_registration_error() {
        let dir = TempDir::new().unwrap();
        let l = ledger(&dir);
        std::fs::create_dir_all(dir.path().join(".provision")).unwrap();
        std::fs::write(l.path(), "tenants: [unclosed").unwrap();
        let err = l.register("test1.example.org", "test1").unwrap_err();
        assert!(matches!(err, ProvisionError::Registration(_)));
        assert!(err.to_string().contains("live but not tracked"));
    }

    #[test]
    fn file_is_readable_yaml() {
        let dir = TempDir::new().unwrap();
        let l = ledger(&dir);
        l.register("test1.example.org", "test1").unwrap();
        let text = std::fs::read_to_string(l.path()).unwrap();
        assert!(text.contains("domain: test1.example.org"));
        assert!(text.contains("namespace: test1"));
        assert!(!text.contains("removed_at"));
    }
}
