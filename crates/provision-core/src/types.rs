use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// TenantRequest
// ---------------------------------------------------------------------------

/// Unvalidated arguments as they arrive from the CLI.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub template: Option<String>,
    pub domain: Option<String>,
    pub tier: Option<String>,
    pub theme: Option<String>,
    pub database_override: Option<String>,
    pub dry_run: bool,
    pub force: bool,
}

/// A validated, normalized provisioning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRequest {
    pub template: String,
    pub domain: String,
    pub namespace: String,
    pub tier: String,
    pub theme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_override: Option<String>,
    pub dry_run: bool,
    pub force: bool,
}

impl TenantRequest {
    /// Name of the tenant database and its application user.
    pub fn database_name(&self) -> String {
        format!("wp_{}", self.namespace)
    }
}

// ---------------------------------------------------------------------------
// ManifestKind
// ---------------------------------------------------------------------------

/// Template documents, in the order they are rendered and applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    Namespace,
    Secrets,
    Application,
    Ingress,
    Automation,
    Kustomization,
}

impl ManifestKind {
    pub fn all() -> &'static [ManifestKind] {
        &[
            ManifestKind::Namespace,
            ManifestKind::Secrets,
            ManifestKind::Application,
            ManifestKind::Ingress,
            ManifestKind::Automation,
            ManifestKind::Kustomization,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ManifestKind::Namespace => "namespace",
            ManifestKind::Secrets => "secrets",
            ManifestKind::Application => "application",
            ManifestKind::Ingress => "ingress",
            ManifestKind::Automation => "automation",
            ManifestKind::Kustomization => "kustomization",
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ManifestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ManifestKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ManifestKind::all().iter().map(|k| k.as_str()).collect();
                format!("unknown document '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Provisioning run lifecycle.
///
/// `Requested → Validated → TierResolved → Rendered → DatabaseProvisioned →
/// Applied → Registered → Complete`; `Failed` is reachable from any
/// non-terminal stage and has no rollback transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Requested,
    Validated,
    TierResolved,
    Rendered,
    DatabaseProvisioned,
    Applied,
    Registered,
    Complete,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Requested => "requested",
            Stage::Validated => "validated",
            Stage::TierResolved => "tier_resolved",
            Stage::Rendered => "rendered",
            Stage::DatabaseProvisioned => "database_provisioned",
            Stage::Applied => "applied",
            Stage::Registered => "registered",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    /// The stage that follows a successful one. Terminal stages have none.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Requested => Some(Stage::Validated),
            Stage::Validated => Some(Stage::TierResolved),
            Stage::TierResolved => Some(Stage::Rendered),
            Stage::Rendered => Some(Stage::DatabaseProvisioned),
            Stage::DatabaseProvisioned => Some(Stage::Applied),
            Stage::Applied => Some(Stage::Registered),
            Stage::Registered => Some(Stage::Complete),
            Stage::Complete | Stage::Failed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared stop flag. The CLI sets it from its Ctrl-C handler; the pipeline
/// checks it between stages and between manifests.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
