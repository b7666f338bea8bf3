//! Request validation and conflict detection.
//!
//! [`validate`] turns CLI arguments into a [`TenantRequest`] without any
//! external call. [`check_conflict`] is the read-only existence check that
//! runs before anything is created.

use tracing::warn;

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::paths;
use crate::registry::{TenantRecord, TenantRegistry};
use crate::retry::RetryPolicy;
use crate::tier::TierResolver;
use crate::types::{RawRequest, TenantRequest};

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProvisionError::Validation(format!("{field} is required"))),
    }
}

/// Validate and normalize `raw`. Tier and theme fall back to the configured
/// defaults; the domain is lowercased and the namespace derived from it.
pub fn validate(raw: RawRequest, resolver: &TierResolver, config: &Config) -> Result<TenantRequest> {
    let domain = required("domain", raw.domain)?.to_ascii_lowercase();
    paths::validate_domain(&domain)?;
    let namespace = paths::namespace_for(&domain);
    paths::validate_namespace(&namespace)?;

    let template = required("template", raw.template)?;
    let tier = required("tier", raw.tier.or_else(|| Some(config.default_tier.clone())))?;
    let theme = required("theme", raw.theme.or_else(|| Some(config.default_theme.clone())))?;
    paths::validate_slug("tier", &tier)?;
    paths::validate_slug("theme", &theme)?;

    let database_override = match raw.database_override.map(|d| d.trim().to_string()) {
        Some(d) if d.is_empty() => None,
        Some(d) => {
            paths::validate_slug("database", &d)?;
            Some(d)
        }
        None => None,
    };

    resolver.require_template(&template)?;
    if !paths::tier_policy_path(resolver.templates_dir(), &template, &tier).is_file() {
        return Err(ProvisionError::PolicyNotFound {
            available: resolver.list_tiers(&template)?,
            template,
            tier,
        });
    }

    Ok(TenantRequest {
        namespace,
        template,
        domain,
        tier,
        theme,
        database_override,
        dry_run: raw.dry_run,
        force: raw.force,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ConflictCheck {
    pub existing: Option<TenantRecord>,
    pub namespace_exists: bool,
    /// Conflicts tolerated because of `force` or dry-run.
    pub warnings: Vec<String>,
}

impl ConflictCheck {
    pub fn is_new(&self) -> bool {
        self.existing.is_none() && !self.namespace_exists
    }
}

/// Look the tenant up in the registry and, when `cluster` is given, ask the
/// cluster whether its namespace exists. The cluster query is retried on
/// transient failures under `retry`.
///
/// A namespace already owned by a different domain is refused even with
/// `force`. Other conflicts are refused unless `force` is set; dry-run only
/// reports them.
pub fn check_conflict(
    request: &TenantRequest,
    registry: &TenantRegistry,
    cluster: Option<&dyn ClusterClient>,
    retry: &RetryPolicy,
) -> Result<ConflictCheck> {
    let mut check = ConflictCheck {
        existing: registry.get(&request.namespace)?,
        ..ConflictCheck::default()
    };

    let mut reasons = Vec::new();
    if let Some(existing) = &check.existing {
        if existing.domain != request.domain {
            return Err(ProvisionError::Conflict {
                namespace: request.namespace.clone(),
                reason: format!("namespace is registered to domain '{}'", existing.domain),
            });
        }
        reasons.push(format!(
            "tenant record exists (tier '{}', created {})",
            existing.tier,
            existing.created_at.format("%Y-%m-%d %H:%M UTC")
        ));
    }

    if !request.dry_run {
        if let Some(cluster) = cluster {
            check.namespace_exists = retry.run("check namespace", |_| {
                cluster.namespace_exists(&request.namespace)
            })?;
            if check.namespace_exists {
                reasons.push("namespace exists in the cluster".to_string());
            }
        }
    }

    if reasons.is_empty() {
        return Ok(check);
    }
    if !request.force && !request.dry_run {
        return Err(ProvisionError::Conflict {
            namespace: request.namespace.clone(),
            reason: reasons.join("; "),
        });
    }
    for reason in &reasons {
        warn!("tenant '{}': {reason}", request.namespace);
    }
    check.warnings = reasons;
    Ok(check)
}
