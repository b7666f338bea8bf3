//! Test fixtures and in-memory client doubles.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::cluster::ClusterClient;
use crate::database::{AdminCredentials, DatabaseClient, DatabaseEndpoint, DatabaseGrant};
use crate::error::ClientError;
use crate::paths;
use crate::registry::TenantRecord;
use crate::render::{Manifest, ManifestSet};
use crate::scaffold;
use crate::secrets::SecretStore;
use crate::tier::{parse_policy, TierPolicy};
use crate::types::{Cancellation, ManifestKind, TenantRequest};

pub const SHARED_TIER: &str = include_str!("../templates/wordpress-shared/tiers/shared.yaml");
pub const DEDICATED_TIER: &str =
    include_str!("../templates/wordpress-shared/tiers/dedicated.yaml");

/// Write the bundled template under `templates` and return its directory.
pub fn write_template(templates: &Path) -> PathBuf {
    scaffold::write_demo_template(templates).unwrap();
    paths::template_dir(templates, scaffold::DEMO_TEMPLATE)
}

pub fn shared_policy() -> TierPolicy {
    parse_policy("wordpress-shared", "shared", SHARED_TIER).unwrap()
}

pub fn dedicated_policy() -> TierPolicy {
    parse_policy("wordpress-shared", "dedicated", DEDICATED_TIER).unwrap()
}

pub fn request(domain: &str, tier: &str) -> TenantRequest {
    TenantRequest {
        template: "wordpress-shared".to_string(),
        domain: domain.to_string(),
        namespace: paths::namespace_for(domain),
        tier: tier.to_string(),
        theme: "default".to_string(),
        database_override: None,
        dry_run: false,
        force: false,
    }
}

pub fn record(namespace: &str, domain: &str) -> TenantRecord {
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

/// One trivial manifest per kind, in order.
pub fn manifest_set() -> ManifestSet {
    ManifestSet {
        manifests: ManifestKind::all()
            .iter()
            .map(|kind| Manifest {
                kind: *kind,
                name: kind.as_str().to_string(),
                content: format!("kind: {kind}\n"),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// FakeCluster
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCluster {
    namespaces: RefCell<BTreeSet<String>>,
    calls: RefCell<Vec<String>>,
    applied: RefCell<Vec<(String, String)>>,
    attempts: RefCell<BTreeMap<String, usize>>,
    namespace_failures: RefCell<usize>,
    failing: Option<(String, bool)>,
    cancel_after: Option<(usize, Cancellation)>,
}

impl FakeCluster {
    pub fn with_namespace(self, namespace: &str) -> Self {
        self.add_namespace(namespace);
        self
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.namespaces.borrow_mut().insert(namespace.to_string());
    }

    /// Every apply of `manifest` fails with a forbidden (or, if
    /// `transient`, a connection refused) error.
    pub fn fail_apply(mut self, manifest: &str, transient: bool) -> Self {
        self.failing = Some((manifest.to_string(), transient));
        self
    }

    /// The next `n` namespace lookups fail with a transient error.
    pub fn fail_namespace_checks(self, n: usize) -> Self {
        *self.namespace_failures.borrow_mut() = n;
        self
    }

    /// Trip `cancel` once `n` manifests have been applied.
    pub fn cancel_after(mut self, n: usize, cancel: Cancellation) -> Self {
        self.cancel_after = Some((n, cancel));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.borrow().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn applied_contents(&self) -> Vec<String> {
        self.applied.borrow().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn apply_attempts(&self, manifest: &str) -> usize {
        self.attempts.borrow().get(manifest).copied().unwrap_or(0)
    }
}

impl ClusterClient for FakeCluster {
    fn namespace_exists(&self, namespace: &str) -> Result<bool, ClientError> {
        self.calls
            .borrow_mut()
            .push(format!("namespace_exists {namespace}"));
        let mut remaining = self.namespace_failures.borrow_mut();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ClientError::transient(
                "kubectl get namespace",
                "The connection to the server was refused: connection refused",
            ));
        }
        Ok(self.namespaces.borrow().contains(namespace))
    }

    fn apply(&self, manifest: &Manifest) -> Result<(), ClientError> {
        self.calls.borrow_mut().push(format!("apply {}", manifest.name));
        *self
            .attempts
            .borrow_mut()
            .entry(manifest.name.clone())
            .or_default() += 1;

        if let Some((name, transient)) = &self.failing {
            if *name == manifest.name {
                let op = format!("kubectl apply {name}");
                return Err(if *transient {
                    ClientError::transient(op, "connection refused")
                } else {
                    ClientError::permanent(op, "Error from server (Forbidden): forbidden")
                });
            }
        }

        let mut applied = self.applied.borrow_mut();
        applied.push((manifest.name.clone(), manifest.content.clone()));
        if let Some((n, cancel)) = &self.cancel_after {
            if applied.len() >= *n {
                cancel.cancel();
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeDatabase
// ---------------------------------------------------------------------------

pub struct FakeDatabase {
    service: bool,
    credentials: bool,
    databases: RefCell<BTreeSet<String>>,
    /// `user -> (database, password)` for users holding a grant.
    users: RefCell<BTreeMap<String, (String, String)>>,
    calls: RefCell<Vec<String>>,
    transient_create_failures: RefCell<usize>,
    fail_user_creation: RefCell<bool>,
}

impl Default for FakeDatabase {
    fn default() -> Self {
        Self {
            service: true,
            credentials: true,
            databases: RefCell::default(),
            users: RefCell::default(),
            calls: RefCell::default(),
            transient_create_failures: RefCell::new(0),
            fail_user_creation: RefCell::new(false),
        }
    }
}

impl FakeDatabase {
    pub fn without_service(mut self) -> Self {
        self.service = false;
        self
    }

    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    /// The next `n` create calls fail with a transient error.
    pub fn fail_creates_transiently(self, n: usize) -> Self {
        *self.transient_create_failures.borrow_mut() = n;
        self
    }

    /// The next create call creates the database, then fails permanently
    /// on the user statement.
    pub fn fail_user_creation_once(self) -> Self {
        *self.fail_user_creation.borrow_mut() = true;
        self
    }

    /// `(database, user)` pairs with a grant.
    pub fn grants(&self) -> Vec<(String, String)> {
        self.users
            .borrow()
            .iter()
            .map(|(user, (db, _))| (db.clone(), user.clone()))
            .collect()
    }

    pub fn password_for(&self, user: &str) -> Option<String> {
        self.users.borrow().get(user).map(|(_, pw)| pw.clone())
    }

    pub fn databases(&self) -> Vec<String> {
        self.databases.borrow().iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("create "))
            .count()
    }
}

impl DatabaseClient for FakeDatabase {
    fn locate(&self, service: &str, host: &str) -> Result<Option<DatabaseEndpoint>, ClientError> {
        self.calls.borrow_mut().push(format!("locate {service}"));
        Ok(self.service.then(|| DatabaseEndpoint {
            service: service.to_string(),
            namespace: "databases".to_string(),
            host: host.to_string(),
            port: 3306,
        }))
    }

    fn admin_credentials(
        &self,
        _endpoint: &DatabaseEndpoint,
    ) -> Result<Option<AdminCredentials>, ClientError> {
        self.calls.borrow_mut().push("admin_credentials".to_string());
        Ok(self.credentials.then(|| AdminCredentials {
            user: "root".to_string(),
            password: "root-secret".to_string(),
        }))
    }

    fn database_exists(
        &self,
        _endpoint: &DatabaseEndpoint,
        _admin: &AdminCredentials,
        database: &str,
    ) -> Result<bool, ClientError> {
        self.calls.borrow_mut().push(format!("exists {database}"));
        Ok(self.databases.borrow().contains(database))
    }

    fn user_has_access(
        &self,
        _endpoint: &DatabaseEndpoint,
        _admin: &AdminCredentials,
        database: &str,
        user: &str,
    ) -> Result<bool, ClientError> {
        self.calls.borrow_mut().push(format!("grants {database} {user}"));
        Ok(self
            .users
            .borrow()
            .get(user)
            .is_some_and(|(db, _)| db == database))
    }

    fn create_database(
        &self,
        endpoint: &DatabaseEndpoint,
        _admin: &AdminCredentials,
        grant: &DatabaseGrant,
    ) -> Result<(), ClientError> {
        self.calls
            .borrow_mut()
            .push(format!("create {}", grant.database));
        let mut remaining = self.transient_create_failures.borrow_mut();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ClientError::transient(
                "create database",
                format!("Can't connect to MySQL server on '{}'", endpoint.host),
            ));
        }
        self.databases.borrow_mut().insert(grant.database.clone());
        if self.fail_user_creation.replace(false) {
            return Err(ClientError::permanent(
                "create database",
                format!("ERROR 1396 (HY000): Operation CREATE USER failed for '{}'@'%'", grant.user),
            ));
        }
        self.users.borrow_mut().insert(
            grant.user.clone(),
            (grant.database.clone(), grant.password.clone()),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeSecrets
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSecrets {
    stored: RefCell<Vec<(String, BTreeMap<String, String>)>>,
}

impl FakeSecrets {
    /// `("<namespace>/<name>", values)` in write order.
    pub fn stored(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.stored.borrow().clone()
    }
}

impl SecretStore for FakeSecrets {
    fn put(
        &self,
        namespace: &str,
        name: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<(), ClientError> {
        self.stored
            .borrow_mut()
            .push((format!("{namespace}/{name}"), values.clone()));
        Ok(())
    }
}
