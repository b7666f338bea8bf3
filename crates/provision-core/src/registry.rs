//! Durable tenant records, stored with redb.
//!
//! One `TENANTS` table keyed by namespace; values are JSON-encoded
//! [`TenantRecord`]s. The registry is the source of truth for conflict
//! detection: a namespace with a record is an existing tenant.
//!
//! redb holds an exclusive lock on the file while a `Database` is open, and
//! provisioning runs for different tenants share one registry. The file is
//! therefore opened per operation and released before returning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Another process holding the file only does so for one transaction, so a
/// short wait is enough.
const OPEN_ATTEMPTS: u32 = 100;
const OPEN_BACKOFF: Duration = Duration::from_millis(20);

fn registry_err(e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::Registry(e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub namespace: String,
    pub domain: String,
    pub template: String,
    pub tier: String,
    pub database_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct TenantRegistry {
    path: PathBuf,
}

impl TenantRegistry {
    /// Open or create the registry at `path`, creating the table up front so
    /// reads on a fresh registry do not fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let registry = Self {
            path: path.to_path_buf(),
        };
        let db = registry.connect()?;
        let wt = db.begin_write().map_err(registry_err)?;
        wt.open_table(TENANTS).map_err(registry_err)?;
        wt.commit().map_err(registry_err)?;
        Ok(registry)
    }

    /// Open the file for one operation, waiting out another holder.
    fn connect(&self) -> Result<Database> {
        let mut attempt = 1;
        loop {
            match Database::create(&self.path) {
                Ok(db) => return Ok(db),
                Err(DatabaseError::DatabaseAlreadyOpen) if attempt < OPEN_ATTEMPTS => {
                    attempt += 1;
                    std::thread::sleep(OPEN_BACKOFF);
                }
                Err(e) => return Err(registry_err(e)),
            }
        }
    }

    pub fn get(&self, namespace: &str) -> Result<Option<TenantRecord>> {
        let db = self.connect()?;
        let rt = db.begin_read().map_err(registry_err)?;
        let table = rt.open_table(TENANTS).map_err(registry_err)?;
        let Some(raw) = table.get(namespace).map_err(registry_err)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(raw.value())?))
    }

    /// Insert or replace the record for `record.namespace`.
    ///
    /// An existing record keeps its `created_at`; a forced re-run only moves
    /// `updated_at`. Returns the record as stored.
    pub fn upsert(&self, mut record: TenantRecord) -> Result<TenantRecord> {
        let db = self.connect()?;
        let wt = db.begin_write().map_err(registry_err)?;
        {
            let mut table = wt.open_table(TENANTS).map_err(registry_err)?;
            let existing = table
                .get(record.namespace.as_str())
                .map_err(registry_err)?
                .map(|raw| serde_json::from_slice::<TenantRecord>(raw.value()))
                .transpose()?;
            if let Some(existing) = existing {
                record.created_at = existing.created_at;
            }
            let value = serde_json::to_vec(&record)?;
            table
                .insert(record.namespace.as_str(), value.as_slice())
                .map_err(registry_err)?;
        }
        wt.commit().map_err(registry_err)?;
        Ok(record)
    }

    /// All records, ordered by namespace.
    pub fn list(&self) -> Result<Vec<TenantRecord>> {
        let db = self.connect()?;
        let rt = db.begin_read().map_err(registry_err)?;
        let table = rt.open_table(TENANTS).map_err(registry_err)?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(registry_err)? {
            let (_, v) = entry.map_err(registry_err)?;
            records.push(serde_json::from_slice(v.value())?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(namespace: &str, domain: &str) -> TenantRecord {
        let now = Utc::now();
        TenantRecord {
            namespace: namespace.to_string(),
            domain: domain.to_string(),
            template: "wordpress-shared".to_string(),
            tier: "shared".to_string(),
            database_name: format!("wp_{namespace}"),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_registry_is_empty() {
        let dir = TempDir::new().unwrap();
        let reg = TenantRegistry::open(&dir.path().join("state/registry.redb")).unwrap();
        assert!(reg.get("test1").unwrap().is_none());
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn upsert_and_get() {
        let dir = TempDir::new().unwrap();
        let reg = TenantRegistry::open(&dir.path().join("registry.redb")).unwrap();
        reg.upsert(record("test1", "test1.example.org")).unwrap();
        let got = reg.get("test1").unwrap().unwrap();
        assert_eq!(got.domain, "test1.example.org");
        assert_eq!(got.database_name, "wp_test1");
    }

    #[test]
    fn upsert_preserves_created_at() {
        let dir = TempDir::new().unwrap();
        let reg = TenantRegistry::open(&dir.path().join("registry.redb")).unwrap();
        let first = reg.upsert(record("test1", "test1.example.org")).unwrap();

        let mut again = record("test1", "test1.example.org");
        again.created_at = first.created_at + chrono::Duration::hours(1);
        again.tier = "dedicated".to_string();
        let stored = reg.upsert(again).unwrap();

        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(reg.get("test1").unwrap().unwrap().tier, "dedicated");
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn list_is_ordered_by_namespace() {
        let dir = TempDir::new().unwrap();
        let reg = TenantRegistry::open(&dir.path().join("registry.redb")).unwrap();
        reg.upsert(record("zeta", "zeta.example.org")).unwrap();
        reg.upsert(record("alpha", "alpha.example.org")).unwrap();
        let names: Vec<String> = reg.list().unwrap().into_iter().map(|r| r.namespace).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn reopen_keeps_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.redb");
        {
            let reg = TenantRegistry::open(&path).unwrap();
            reg.upsert(record("test1", "test1.example.org")).unwrap();
        }
        let reg = TenantRegistry::open(&path).unwrap();
        assert!(reg.get("test1").unwrap().is_some());
    }

    #[test]
    fn handles_on_the_same_file_coexist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.redb");
        let first = TenantRegistry::open(&path).unwrap();
        let second = TenantRegistry::open(&path).unwrap();

        first.upsert(record("alpha", "alpha.example.org")).unwrap();
        second.upsert(record("beta", "beta.example.org")).unwrap();

        assert!(second.get("alpha").unwrap().is_some());
        assert_eq!(first.list().unwrap().len(), 2);
    }

    #[test]
    fn concurrent_writers_on_different_namespaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.redb");
        TenantRegistry::open(&path).unwrap();

        let handles: Vec<_> = ["alpha", "beta", "gamma", "delta"]
            .into_iter()
            .map(|ns| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let reg = TenantRegistry::open(&path).unwrap();
                    reg.upsert(record(ns, &format!("{ns}.example.org"))).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reg = TenantRegistry::open(&path).unwrap();
        let names: Vec<String> = reg.list().unwrap().into_iter().map(|r| r.namespace).collect();
        assert_eq!(names, vec!["alpha", "beta", "delta", "gamma"]);
    }
}
