//! Tenant database provisioning on the shared MariaDB service.
//!
//! Only tiers with `external_db_enabled` get a database here; dedicated tiers
//! run their own MariaDB from the application manifest. The flow is
//! idempotent: a database whose user already holds its grant short-circuits
//! before any mutation. Anything less (a database left behind by a failed
//! user or grant statement) is completed by re-running the whole batch,
//! which only uses statements that are safe to repeat.

use std::collections::BTreeMap;
use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cluster::Kubectl;
use crate::config::DatabaseConfig;
use crate::error::{ClientError, ProvisionError, Result};
use crate::retry::RetryPolicy;
use crate::secrets::SecretStore;
use crate::tier::TierPolicy;
use crate::types::TenantRequest;

/// Name under which tenant database credentials are stored.
pub const DATABASE_SECRET: &str = "database";

const PASSWORD_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEndpoint {
    pub service: String,
    pub namespace: String,
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct AdminCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Database plus the application user that owns it.
#[derive(Clone)]
pub struct DatabaseGrant {
    pub database: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseConnectionInfo {
    pub host: String,
    pub database_name: String,
    pub user: String,
    pub verified: bool,
    /// False when the database already existed and nothing was changed.
    pub created: bool,
}

pub trait DatabaseClient {
    /// `None` when `service` does not exist.
    fn locate(&self, service: &str, host: &str) -> std::result::Result<Option<DatabaseEndpoint>, ClientError>;

    /// `None` when the admin secret or its key is absent.
    fn admin_credentials(
        &self,
        endpoint: &DatabaseEndpoint,
    ) -> std::result::Result<Option<AdminCredentials>, ClientError>;

    fn database_exists(
        &self,
        endpoint: &DatabaseEndpoint,
        admin: &AdminCredentials,
        database: &str,
    ) -> std::result::Result<bool, ClientError>;

    /// Whether `user@'%'` holds a grant on `database`.
    fn user_has_access(
        &self,
        endpoint: &DatabaseEndpoint,
        admin: &AdminCredentials,
        database: &str,
        user: &str,
    ) -> std::result::Result<bool, ClientError>;

    /// Create the database and user and grant the user all privileges on it.
    /// Must be safe to repeat.
    fn create_database(
        &self,
        endpoint: &DatabaseEndpoint,
        admin: &AdminCredentials,
        grant: &DatabaseGrant,
    ) -> std::result::Result<(), ClientError>;
}

// ---------------------------------------------------------------------------
// Host resolution
// ---------------------------------------------------------------------------

pub fn service_dns(service: &str, namespace: &str) -> String {
    format!("{service}.{namespace}.svc.cluster.local")
}

/// Service that fronts the tenant's database on the shared server.
pub fn database_service<'a>(request: &'a TenantRequest, config: &'a DatabaseConfig) -> &'a str {
    request
        .database_override
        .as_deref()
        .unwrap_or(config.service.as_str())
}

/// Where the application reaches its database: the in-namespace MariaDB
/// for dedicated tiers; otherwise the `--database` override, then the
/// policy's external host, then the configured shared service.
pub fn database_host(request: &TenantRequest, policy: &TierPolicy, config: &DatabaseConfig) -> String {
    if policy.mariadb_enabled {
        return service_dns("mariadb", &request.namespace);
    }
    if let Some(service) = &request.database_override {
        return service_dns(service, &config.namespace);
    }
    if let Some(host) = &policy.external_db_host {
        return host.clone();
    }
    service_dns(&config.service, &config.namespace)
}

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

pub struct DatabaseProvisioner<'a> {
    client: &'a dyn DatabaseClient,
    secrets: &'a dyn SecretStore,
    config: &'a DatabaseConfig,
    retry: RetryPolicy,
}

impl<'a> DatabaseProvisioner<'a> {
    pub fn new(
        client: &'a dyn DatabaseClient,
        secrets: &'a dyn SecretStore,
        config: &'a DatabaseConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            secrets,
            config,
            retry,
        }
    }

    /// Ensure `wp_<namespace>` exists on the shared server. Returns `None`
    /// for tiers that run their own database.
    pub fn provision(
        &self,
        request: &TenantRequest,
        policy: &TierPolicy,
    ) -> Result<Option<DatabaseConnectionInfo>> {
        if policy.mariadb_enabled {
            debug!("tier '{}' runs a dedicated database; nothing to provision", policy.tier);
            return Ok(None);
        }

        let failed = |e: ClientError| ProvisionError::Provisioning(e.to_string());
        let service = database_service(request, self.config);
        let host = database_host(request, policy, self.config);
        let database = request.database_name();

        let endpoint = self
            .retry
            .run("locate database", |_| self.client.locate(service, &host))
            .map_err(failed)?
            .ok_or_else(|| {
                ProvisionError::Provisioning(format!(
                    "database service '{service}' not found in namespace '{}'",
                    self.config.namespace
                ))
            })?;

        let admin = self
            .retry
            .run("read admin credentials", |_| self.client.admin_credentials(&endpoint))
            .map_err(failed)?
            .ok_or_else(|| {
                ProvisionError::Provisioning(format!(
                    "admin credentials could not be retrieved from secret '{}/{}'",
                    self.config.namespace, self.config.admin_secret
                ))
            })?;

        let mut info = DatabaseConnectionInfo {
            host: endpoint.host.clone(),
            database_name: database.clone(),
            user: database.clone(),
            verified: false,
            created: false,
        };

        let exists = self
            .retry
            .run("query database", |_| {
                self.client.database_exists(&endpoint, &admin, &database)
            })
            .map_err(failed)?;
        if exists {
            let granted = self
                .retry
                .run("query grants", |_| {
                    self.client
                        .user_has_access(&endpoint, &admin, &database, &info.user)
                })
                .map_err(failed)?;
            if granted {
                info!("database '{database}' already exists on {}", endpoint.host);
                info.verified = true;
                return Ok(Some(info));
            }
            warn!(
                "database '{database}' exists but user '{}' has no grant on it; completing setup",
                info.user
            );
        }

        let grant = DatabaseGrant {
            database: database.clone(),
            user: database.clone(),
            password: generate_password(),
        };

        // Credentials are stored before the user exists so a failure here
        // never leaves a user whose password nobody knows.
        let mut values = BTreeMap::new();
        values.insert("host".to_string(), endpoint.host.clone());
        values.insert("database".to_string(), grant.database.clone());
        values.insert("user".to_string(), grant.user.clone());
        values.insert("password".to_string(), grant.password.clone());
        self.secrets
            .put(&request.namespace, DATABASE_SECRET, &values)
            .map_err(|e| ProvisionError::Provisioning(format!("could not store credentials: {e}")))?;

        self.retry
            .run("create database", |_| {
                self.client.create_database(&endpoint, &admin, &grant)
            })
            .map_err(failed)?;

        let verified = self
            .retry
            .run("verify database", |_| {
                self.client.database_exists(&endpoint, &admin, &database)
            })
            .map_err(failed)?;
        if !verified {
            return Err(ProvisionError::Provisioning(format!(
                "database '{database}' not found after creation"
            )));
        }
        let granted = self
            .retry
            .run("verify grants", |_| {
                self.client
                    .user_has_access(&endpoint, &admin, &database, &grant.user)
            })
            .map_err(failed)?;
        if !granted {
            return Err(ProvisionError::Provisioning(format!(
                "user '{}' has no grant on '{database}' after creation",
                grant.user
            )));
        }

        if exists {
            info!("completed user and grant for database '{database}' on {}", endpoint.host);
        } else {
            info!("created database '{database}' on {}", endpoint.host);
        }
        info.verified = true;
        info.created = true;
        Ok(Some(info))
    }
}

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

fn sql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn exists_query(database: &str) -> String {
    format!(
        "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {};",
        sql_string(database)
    )
}

fn grant_query(database: &str, user: &str) -> String {
    format!(
        "SELECT User FROM mysql.db WHERE Db = {} AND User = {} AND Host = '%';",
        sql_string(database),
        sql_string(user)
    )
}

fn create_statements(grant: &DatabaseGrant) -> String {
    let db = sql_ident(&grant.database);
    let user = format!("{}@'%'", sql_string(&grant.user));
    let password = sql_string(&grant.password);
    [
        format!("CREATE DATABASE IF NOT EXISTS {db} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;"),
        format!("CREATE USER IF NOT EXISTS {user} IDENTIFIED BY {password};"),
        format!("ALTER USER {user} IDENTIFIED BY {password};"),
        format!("GRANT ALL PRIVILEGES ON {db}.* TO {user};"),
        "FLUSH PRIVILEGES;".to_string(),
    ]
    .join("\n")
}

// ---------------------------------------------------------------------------
// kubectl-backed client
// ---------------------------------------------------------------------------

/// Reads the admin password from stdin's first line so it never appears in
/// a process argument list; the remaining stdin is the SQL.
const SQL_SHELL: &str = "read -r pw; bin=$(command -v mariadb || command -v mysql); \
MYSQL_PWD=\"$pw\" exec \"$bin\" -h \"$1\" -P \"$2\" -u \"$3\" -N -B";

/// Talks to the shared MariaDB by running its client inside the service's
/// pod via `kubectl exec`.
pub struct KubectlMariaDb {
    kubectl: Kubectl,
    config: DatabaseConfig,
}

impl KubectlMariaDb {
    pub fn new(kubectl: Kubectl, config: DatabaseConfig) -> Self {
        Self { kubectl, config }
    }

    fn run_sql(
        &self,
        endpoint: &DatabaseEndpoint,
        admin: &AdminCredentials,
        sql: &str,
        label: &str,
    ) -> std::result::Result<String, ClientError> {
        let target = format!("svc/{}", endpoint.service);
        let port = endpoint.port.to_string();
        let stdin = format!("{}\n{sql}\n", admin.password);
        self.kubectl.exec(
            &endpoint.namespace,
            &target,
            &["sh", "-c", SQL_SHELL, "sh", &endpoint.host, &port, &admin.user],
            &stdin,
            label,
        )
    }
}

impl DatabaseClient for KubectlMariaDb {
    fn locate(&self, service: &str, host: &str) -> std::result::Result<Option<DatabaseEndpoint>, ClientError> {
        if !self.kubectl.exists("service", service, Some(&self.config.namespace))? {
            return Ok(None);
        }
        Ok(Some(DatabaseEndpoint {
            service: service.to_string(),
            namespace: self.config.namespace.clone(),
            host: host.to_string(),
            port: self.config.port,
        }))
    }

    fn admin_credentials(
        &self,
        endpoint: &DatabaseEndpoint,
    ) -> std::result::Result<Option<AdminCredentials>, ClientError> {
        let password = self.kubectl.secret_value(
            &endpoint.namespace,
            &self.config.admin_secret,
            &self.config.admin_secret_key,
        )?;
        Ok(password.map(|password| AdminCredentials {
            user: self.config.admin_user.clone(),
            password,
        }))
    }

    fn database_exists(
        &self,
        endpoint: &DatabaseEndpoint,
        admin: &AdminCredentials,
        database: &str,
    ) -> std::result::Result<bool, ClientError> {
        let out = self.run_sql(endpoint, admin, &exists_query(database), "query database")?;
        Ok(out.lines().any(|l| l.trim() == database))
    }

    fn user_has_access(
        &self,
        endpoint: &DatabaseEndpoint,
        admin: &AdminCredentials,
        database: &str,
        user: &str,
    ) -> std::result::Result<bool, ClientError> {
        let out = self.run_sql(endpoint, admin, &grant_query(database, user), "query grants")?;
        Ok(out.lines().any(|l| l.trim() == user))
    }

    fn create_database(
        &self,
        endpoint: &DatabaseEndpoint,
        admin: &AdminCredentials,
        grant: &DatabaseGrant,
    ) -> std::result::Result<(), ClientError> {
        self.run_sql(endpoint, admin, &create_statements(grant), "create database")
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
