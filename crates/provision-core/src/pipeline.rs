//! The provisioning run.
//!
//! `Requested → Validated → TierResolved → Rendered → DatabaseProvisioned →
//! Applied → Registered → Complete`. A failure moves the run to `Failed` and
//! records the stage it happened in; nothing is rolled back, recovery is a
//! forced re-run. Dry-run stops after listing the rendered manifests and
//! never locks, writes state, or calls a client.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::apply::{ApplyMode, ApplyReport, Applier};
use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::database::{self, DatabaseClient, DatabaseConnectionInfo, DatabaseProvisioner};
use crate::error::{ProvisionError, Result};
use crate::ledger::LedgerStore;
use crate::lock::NamespaceLock;
use crate::paths;
use crate::registry::{TenantRecord, TenantRegistry};
use crate::render::{self, ManifestSet, RenderContext};
use crate::secrets::SecretStore;
use crate::tier::{TierPolicy, TierResolver};
use crate::types::{Cancellation, RawRequest, Stage, TenantRequest};
use crate::validate::{self, ConflictCheck};

/// The side-effecting collaborators of a run.
#[derive(Clone, Copy)]
pub struct Clients<'a> {
    pub cluster: &'a dyn ClusterClient,
    pub database: &'a dyn DatabaseClient,
    pub secrets: &'a dyn SecretStore,
    pub ledger: &'a dyn LedgerStore,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProvisionOutcome {
    pub stage: Stage,
    pub history: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<TenantRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConnectionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<ProvisionError>,
}

impl ProvisionOutcome {
    fn new() -> Self {
        let mut outcome = Self {
            stage: Stage::Requested,
            history: Vec::new(),
            request: None,
            warnings: Vec::new(),
            manifests: Vec::new(),
            manifest_dir: None,
            database: None,
            apply: None,
            ledger_changed: None,
            failed_stage: None,
            error: None,
            failure: None,
        };
        outcome.record(Stage::Requested);
        outcome
    }

    fn record(&mut self, stage: Stage) {
        self.stage = stage;
        self.history.push(StageRecord {
            stage,
            at: Utc::now(),
        });
    }

    fn advance(&mut self, stage: Stage) {
        if let Some(req) = &self.request {
            info!("{}: {stage}", req.namespace);
        } else {
            info!("provisioning: {stage}");
        }
        self.record(stage);
    }

    fn fail(&mut self, error: ProvisionError) {
        let at = self.stage.next().unwrap_or(self.stage);
        warn!("provisioning failed during {at}: {error}");
        self.failed_stage = Some(at);
        self.error = Some(error.to_string());
        self.failure = Some(error);
        self.record(Stage::Failed);
    }

    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.history.iter().map(|r| r.stage).collect()
    }
}

/// Validate, resolve and render without touching any state. Shared by the
/// run and by `provision render`.
pub fn preview(
    raw: RawRequest,
    config: &Config,
    resolver: &TierResolver,
) -> Result<(TenantRequest, TierPolicy, ManifestSet)> {
    let request = validate::validate(raw, resolver, config)?;
    let policy = resolver.resolve(&request.template, &request.tier)?;
    let set = render_for(&request, &policy, config, resolver)?;
    Ok((request, policy, set))
}

fn render_for(
    request: &TenantRequest,
    policy: &TierPolicy,
    config: &Config,
    resolver: &TierResolver,
) -> Result<ManifestSet> {
    let host = database::database_host(request, policy, &config.database);
    let ctx = RenderContext::new(request, policy, host);
    render::render(&ctx, &paths::template_dir(resolver.templates_dir(), &request.template))
}

pub struct Pipeline<'a> {
    root: PathBuf,
    config: &'a Config,
    resolver: &'a TierResolver,
    registry: &'a TenantRegistry,
    clients: Clients<'a>,
    cancel: Cancellation,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        root: &Path,
        config: &'a Config,
        resolver: &'a TierResolver,
        registry: &'a TenantRegistry,
        clients: Clients<'a>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            resolver,
            registry,
            clients,
            cancel: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the request to `Complete` or `Failed`. The outcome carries the
    /// error, if any, in `failure`.
    pub fn run(&self, raw: RawRequest) -> ProvisionOutcome {
        let mut outcome = ProvisionOutcome::new();
        if let Err(error) = self.execute(raw, &mut outcome) {
            outcome.fail(error);
        }
        outcome
    }

    fn checkpoint(&self, next: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled(next.to_string()));
        }
        Ok(())
    }

    fn execute(&self, raw: RawRequest, out: &mut ProvisionOutcome) -> Result<()> {
        let request = validate::validate(raw, self.resolver, self.config)?;
        let dry_run = request.dry_run;
        out.request = Some(request.clone());

        // Held until this function returns, on every path.
        let _lock = if dry_run {
            None
        } else {
            Some(NamespaceLock::acquire(&self.root, &request.namespace)?)
        };
        let cluster = (!dry_run).then_some(self.clients.cluster);
        let retry = self.config.retry.policy();
        let conflict = validate::check_conflict(&request, self.registry, cluster, &retry)?;
        out.warnings.extend(conflict.warnings.iter().cloned());
        out.advance(Stage::Validated);

        self.checkpoint(Stage::TierResolved)?;
        let policy = self.resolver.resolve(&request.template, &request.tier)?;
        out.advance(Stage::TierResolved);

        self.checkpoint(Stage::Rendered)?;
        let set = render_for(&request, &policy, self.config, self.resolver)?;
        out.manifests = set.names().into_iter().map(str::to_string).collect();
        if !dry_run {
            let dir = paths::tenant_manifest_dir(&self.root, &request.namespace);
            set.write_to(&dir)?;
            out.manifest_dir = Some(dir);
        }
        out.advance(Stage::Rendered);

        let applier = Applier::new(self.clients.cluster, retry.clone());
        if dry_run {
            out.apply = Some(applier.apply(&set, ApplyMode::DryRun, &self.cancel));
            out.advance(Stage::Applied);
            out.advance(Stage::Complete);
            return Ok(());
        }

        self.checkpoint(Stage::DatabaseProvisioned)?;
        out.database = DatabaseProvisioner::new(
            self.clients.database,
            self.clients.secrets,
            &self.config.database,
            retry,
        )
        .provision(&request, &policy)?;
        if policy.mariadb_enabled {
            self.issue_dedicated_credentials(&request, &conflict)?;
        }
        out.advance(Stage::DatabaseProvisioned);

        self.checkpoint(Stage::Applied)?;
        let report = applier.apply(&set, ApplyMode::Apply, &self.cancel);
        out.apply = Some(report.clone());
        report.into_result()?;
        out.advance(Stage::Applied);

        let now = Utc::now();
        self.registry.upsert(TenantRecord {
            namespace: request.namespace.clone(),
            domain: request.domain.clone(),
            template: request.template.clone(),
            tier: request.tier.clone(),
            database_name: request.database_name(),
            created_at: now,
            updated_at: now,
        })?;
        out.ledger_changed = Some(
            self.clients
                .ledger
                .register(&request.domain, &request.namespace)?,
        );
        out.advance(Stage::Registered);

        out.advance(Stage::Complete);
        Ok(())
    }

    /// Dedicated tiers get their root and application passwords from the
    /// secret store. Only a new tenant is issued credentials; re-runs keep
    /// the ones the running database was initialized with.
    fn issue_dedicated_credentials(&self, request: &TenantRequest, conflict: &ConflictCheck) -> Result<()> {
        if !conflict.is_new() {
            return Ok(());
        }
        let mut values = BTreeMap::new();
        values.insert("database".to_string(), request.database_name());
        values.insert("user".to_string(), request.database_name());
        values.insert("password".to_string(), database::generate_password());
        values.insert("root-password".to_string(), database::generate_password());
        self.clients
            .secrets
            .put(&request.namespace, database::DATABASE_SECRET, &values)
            .map_err(|e| ProvisionError::Provisioning(format!("could not store credentials: {e}")))
    }
}
