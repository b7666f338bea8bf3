//! Tier policy documents.
//!
//! Each template ships one policy per tier at
//! `templates/<template>/tiers/<tier>.yaml`. A policy decides whether the
//! tenant gets a dedicated MariaDB (rendered into its manifests) or a database
//! on the shared service, plus resource, storage and rate-limit settings.
//!
//! Resolution is strict: every field is required, and a document naming
//! both or neither database mode is rejected.

use crate::error::{ProvisionError, Result};
use crate::{io, paths};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

// ---------------------------------------------------------------------------
// Resolved policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub requests: Resources,
    pub limits: Resources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub connections: u32,
    pub rpm: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub template: String,
    pub tier: String,
    pub mariadb_enabled: bool,
    pub external_db_enabled: bool,
    pub external_db_host: Option<String>,
    pub persistence_enabled: bool,
    pub storage_size: String,
    pub resources: ResourceSpec,
    /// Present exactly when `mariadb_enabled`.
    pub db_resources: Option<ResourceSpec>,
    pub rate_limit: RateLimit,
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Quantity {
    Text(String),
    Int(u64),
    Float(f64),
}

impl Quantity {
    fn into_text(self) -> String {
        match self {
            Quantity::Text(s) => s.trim().to_string(),
            Quantity::Int(n) => n.to_string(),
            Quantity::Float(f) => f.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyDoc {
    database: Option<DatabaseDoc>,
    persistence: Option<PersistenceDoc>,
    resources: Option<ResourceDoc>,
    database_resources: Option<ResourceDoc>,
    rate_limit: Option<RateLimitDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseDoc {
    mariadb: Option<bool>,
    external: Option<bool>,
    external_host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PersistenceDoc {
    enabled: Option<bool>,
    size: Option<Quantity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceDoc {
    requests: Option<ResourcesDoc>,
    limits: Option<ResourcesDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourcesDoc {
    cpu: Option<Quantity>,
    memory: Option<Quantity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitDoc {
    connections: Option<u32>,
    rpm: Option<u32>,
}

/// Collects every missing field so one error names them all.
#[derive(Default)]
struct Missing(Vec<String>);

impl Missing {
    fn text(&mut self, field: &str, value: Option<Quantity>) -> String {
        let text = value.map(Quantity::into_text).unwrap_or_default();
        if text.is_empty() {
            self.0.push(field.to_string());
        }
        text
    }

    fn flag(&mut self, field: &str, value: Option<bool>) -> bool {
        value.unwrap_or_else(|| {
            self.0.push(field.to_string());
            false
        })
    }

    fn count(&mut self, field: &str, value: Option<u32>) -> u32 {
        match value {
            Some(n) if n > 0 => n,
            _ => {
                self.0.push(field.to_string());
                0
            }
        }
    }

    fn resources(&mut self, prefix: &str, doc: Option<ResourcesDoc>) -> Resources {
        let doc = doc.unwrap_or_default();
        Resources {
            cpu: self.text(&format!("{prefix}.cpu"), doc.cpu),
            memory: self.text(&format!("{prefix}.memory"), doc.memory),
        }
    }

    fn spec(&mut self, prefix: &str, doc: Option<ResourceDoc>) -> ResourceSpec {
        let doc = doc.unwrap_or_default();
        ResourceSpec {
            requests: self.resources(&format!("{prefix}.requests"), doc.requests),
            limits: self.resources(&format!("{prefix}.limits"), doc.limits),
        }
    }
}

impl PolicyDoc {
    fn into_policy(self, template: &str, tier: &str) -> Result<TierPolicy> {
        let invalid = |reason: String| ProvisionError::PolicyInvalid {
            template: template.to_string(),
            tier: tier.to_string(),
            reason,
        };

        let mut missing = Missing::default();
        let database = self.database.unwrap_or_default();
        let mariadb_enabled = missing.flag("database.mariadb", database.mariadb);
        let external_db_enabled = missing.flag("database.external", database.external);
        let persistence = self.persistence.unwrap_or_default();
        let persistence_enabled = missing.flag("persistence.enabled", persistence.enabled);
        let storage_size = missing.text("persistence.size", persistence.size);
        let resources = missing.spec("resources", self.resources);
        let db_resources = if mariadb_enabled {
            Some(missing.spec("database_resources", self.database_resources))
        } else {
            None
        };
        let rate = self.rate_limit.unwrap_or_default();
        let rate_limit = RateLimit {
            connections: missing.count("rate_limit.connections", rate.connections),
            rpm: missing.count("rate_limit.rpm", rate.rpm),
        };

        if !missing.0.is_empty() {
            return Err(invalid(format!(
                "missing or empty fields: {}",
                missing.0.join(", ")
            )));
        }
        if mariadb_enabled == external_db_enabled {
            return Err(invalid(
                "exactly one of database.mariadb and database.external must be true".to_string(),
            ));
        }

        let external_db_host = database
            .external_host
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());

        Ok(TierPolicy {
            template: template.to_string(),
            tier: tier.to_string(),
            mariadb_enabled,
            external_db_enabled,
            external_db_host,
            persistence_enabled,
            storage_size,
            resources,
            db_resources,
            rate_limit,
        })
    }
}

/// Parse a policy document without touching the filesystem.
pub fn parse_policy(template: &str, tier: &str, yaml: &str) -> Result<TierPolicy> {
    let doc: PolicyDoc = serde_yaml::from_str(yaml).map_err(|e| ProvisionError::PolicyInvalid {
        template: template.to_string(),
        tier: tier.to_string(),
        reason: e.to_string(),
    })?;
    doc.into_policy(template, tier)
}

// ---------------------------------------------------------------------------
// TierResolver
// ---------------------------------------------------------------------------

/// Loads tier policies from a templates directory, caching each
/// `(template, tier)` pair for the lifetime of the resolver.
pub struct TierResolver {
    templates: PathBuf,
    cache: Mutex<HashMap<(String, String), TierPolicy>>,
}

impl TierResolver {
    pub fn new(templates: impl Into<PathBuf>) -> Self {
        Self {
            templates: templates.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates
    }

    /// Templates are the subdirectories of the templates root.
    pub fn list_templates(&self) -> Result<Vec<String>> {
        io::list_subdirs(&self.templates)
    }

    pub fn list_tiers(&self, template: &str) -> Result<Vec<String>> {
        let dir = paths::template_dir(&self.templates, template).join(paths::TIERS_SUBDIR);
        io::list_stems(&dir, "yaml")
    }

    /// Fails with `Validation` when the template itself is unknown.
    pub fn require_template(&self, template: &str) -> Result<PathBuf> {
        paths::validate_slug("template", template)?;
        let dir = paths::template_dir(&self.templates, template);
        if !dir.is_dir() {
            let available = self.list_templates()?;
            return Err(ProvisionError::Validation(format!(
                "unknown template '{template}' (available: {})",
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            )));
        }
        Ok(dir)
    }

    pub fn resolve(&self, template: &str, tier: &str) -> Result<TierPolicy> {
        let key = (template.to_string(), tier.to_string());
        if let Some(hit) = self.cache_get(&key) {
            return Ok(hit);
        }

        self.require_template(template)?;
        paths::validate_slug("tier", tier)?;

        let path = paths::tier_policy_path(&self.templates, template, tier);
        if !path.is_file() {
            return Err(ProvisionError::PolicyNotFound {
                template: template.to_string(),
                tier: tier.to_string(),
                available: self.list_tiers(template)?,
            });
        }
        debug!("loading tier policy {}", path.display());
        let yaml = std::fs::read_to_string(&path)?;
        let policy = parse_policy(template, tier, &yaml)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, policy.clone());
        }
        Ok(policy)
    }

    fn cache_get(&self, key: &(String, String)) -> Option<TierPolicy> {
        self.cache.lock().ok().and_then(|c| c.get(key).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
