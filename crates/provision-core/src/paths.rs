use crate::error::{ProvisionError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const STATE_DIR: &str = ".provision";
pub const LOCKS_DIR: &str = ".provision/locks";
pub const TENANTS_DIR: &str = ".provision/tenants";
pub const SECRETS_DIR: &str = ".provision/secrets";

pub const CONFIG_FILE: &str = ".provision/config.yaml";
pub const REGISTRY_FILE: &str = ".provision/registry.redb";
pub const LEDGER_FILE: &str = ".provision/ledger.yaml";
pub const SECRETS_KEYS_FILE: &str = ".provision/secrets/keys.yaml";

pub const DEFAULT_TEMPLATES_DIR: &str = "templates";
pub const MANIFESTS_SUBDIR: &str = "manifests";
pub const TIERS_SUBDIR: &str = "tiers";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn registry_path(root: &Path) -> PathBuf {
    root.join(REGISTRY_FILE)
}

pub fn ledger_path(root: &Path) -> PathBuf {
    root.join(LEDGER_FILE)
}

pub fn lock_path(root: &Path, namespace: &str) -> PathBuf {
    root.join(LOCKS_DIR).join(format!("{namespace}.lock"))
}

pub fn tenant_manifest_dir(root: &Path, namespace: &str) -> PathBuf {
    root.join(TENANTS_DIR).join(namespace)
}

pub fn secrets_keys_path(root: &Path) -> PathBuf {
    root.join(SECRETS_KEYS_FILE)
}

pub fn tenant_secrets_dir(root: &Path, namespace: &str) -> PathBuf {
    root.join(SECRETS_DIR).join("tenants").join(namespace)
}

pub fn tenant_secret_path(root: &Path, namespace: &str, name: &str) -> PathBuf {
    tenant_secrets_dir(root, namespace).join(format!("{name}.age"))
}

pub fn template_dir(templates: &Path, template: &str) -> PathBuf {
    templates.join(template)
}

pub fn template_manifests_dir(templates: &Path, template: &str) -> PathBuf {
    template_dir(templates, template).join(MANIFESTS_SUBDIR)
}

pub fn tier_policy_path(templates: &Path, template: &str, tier: &str) -> PathBuf {
    template_dir(templates, template)
        .join(TIERS_SUBDIR)
        .join(format!("{tier}.yaml"))
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();
static LABEL_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("slug regex is valid")
    })
}

fn label_re() -> &'static Regex {
    LABEL_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?$").expect("label regex is valid")
    })
}

/// Template and tier names double as directory and file names.
pub fn validate_slug(kind: &str, slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(ProvisionError::Validation(format!(
            "invalid {kind} '{slug}': must be lowercase alphanumeric with hyphens"
        )));
    }
    Ok(())
}

/// Check a (lowercased) domain against the hostname grammar.
///
/// Labels are 1-63 characters of `[a-z0-9-]` without a leading or trailing
/// hyphen; at least two labels; at most 253 characters overall.
pub fn validate_domain(domain: &str) -> Result<()> {
    let invalid = |why: &str| ProvisionError::Validation(format!("invalid domain '{domain}': {why}"));

    if domain.is_empty() {
        return Err(invalid("domain is required"));
    }
    if domain.len() > 253 {
        return Err(invalid("longer than 253 characters"));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid("expected a fully-qualified name such as site.example.org"));
    }
    for label in labels {
        if label.is_empty() {
            return Err(invalid("empty label"));
        }
        if !label_re().is_match(label) {
            return Err(invalid(&format!(
                "label '{label}' must be 1-63 alphanumeric or hyphen characters \
                 without a leading or trailing hyphen"
            )));
        }
    }
    Ok(())
}

/// Longest namespace whose database name `wp_<namespace>` fits MariaDB's
/// 64-character identifier limit.
pub const MAX_NAMESPACE_LEN: usize = 61;

/// A domain label may be 63 characters, but the namespace also names the
/// tenant database.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(ProvisionError::Validation(format!(
            "namespace '{namespace}' is {} characters; the database name wp_<namespace> \
             must fit MariaDB's 64-character identifier limit (at most {MAX_NAMESPACE_LEN})",
            namespace.len()
        )));
    }
    Ok(())
}

/// Tenant namespace: the first label of the domain, lowercased.
pub fn namespace_for(domain: &str) -> String {
    domain
        .split('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
