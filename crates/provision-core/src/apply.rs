//! Ordered manifest apply.
//!
//! Manifests go to the cluster one at a time in render order. The first
//! failure stops the run: later manifests are reported `skipped`, earlier
//! ones stay applied. In dry-run every manifest is reported `listed` and the
//! cluster is never called.

use serde::Serialize;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::error::{ProvisionError, Result};
use crate::render::ManifestSet;
use crate::retry::RetryPolicy;
use crate::types::Cancellation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    Failed { cause: String },
    Skipped,
    Listed,
}

impl ApplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::Failed { .. } => "failed",
            ApplyOutcome::Skipped => "skipped",
            ApplyOutcome::Listed => "listed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyEntry {
    pub manifest: String,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub entries: Vec<ApplyEntry>,
    /// Set when cancellation stopped the run before a manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<String>,
}

impl ApplyReport {
    fn count(&self, label: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome.label() == label)
            .count()
    }

    pub fn applied(&self) -> usize {
        self.count("applied")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn listed(&self) -> usize {
        self.count("listed")
    }

    pub fn failure(&self) -> Option<(&str, &str)> {
        self.entries.iter().find_map(|e| match &e.outcome {
            ApplyOutcome::Failed { cause } => Some((e.manifest.as_str(), cause.as_str())),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none() && self.cancelled_at.is_none()
    }

    /// `Apply` naming the failing manifest, or `Cancelled`.
    pub fn into_result(self) -> Result<ApplyReport> {
        if let Some((manifest, cause)) = self.failure() {
            return Err(ProvisionError::Apply {
                manifest: manifest.to_string(),
                cause: cause.to_string(),
            });
        }
        if let Some(manifest) = &self.cancelled_at {
            return Err(ProvisionError::Cancelled(format!("manifest '{manifest}'")));
        }
        Ok(self)
    }
}

pub struct Applier<'a> {
    cluster: &'a dyn ClusterClient,
    retry: RetryPolicy,
}

impl<'a> Applier<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, retry: RetryPolicy) -> Self {
        Self { cluster, retry }
    }

    pub fn apply(&self, set: &ManifestSet, mode: ApplyMode, cancel: &Cancellation) -> ApplyReport {
        let mut report = ApplyReport {
            dry_run: mode == ApplyMode::DryRun,
            ..ApplyReport::default()
        };
        let mut stopped = false;

        for manifest in set {
            let outcome = if mode == ApplyMode::DryRun {
                ApplyOutcome::Listed
            } else if stopped {
                ApplyOutcome::Skipped
            } else if cancel.is_cancelled() {
                warn!("cancelled before manifest '{}'", manifest.name);
                report.cancelled_at = Some(manifest.name.clone());
                stopped = true;
                ApplyOutcome::Skipped
            } else {
                let label = format!("apply {}", manifest.name);
                match self.retry.run(&label, |_| self.cluster.apply(manifest)) {
                    Ok(()) => {
                        info!("applied {}", manifest.name);
                        ApplyOutcome::Applied
                    }
                    Err(e) => {
                        warn!("apply of '{}' failed: {}", manifest.name, e.message);
                        stopped = true;
                        ApplyOutcome::Failed { cause: e.message }
                    }
                }
            };
            report.entries.push(ApplyEntry {
                manifest: manifest.name.clone(),
                outcome,
            });
        }
        report
    }
}
