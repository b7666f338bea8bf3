use crate::output::{print_fields, print_json};
use anyhow::Context;
use clap::Args;
use provision_core::{
    apply::ApplyOutcome,
    cluster::Kubectl,
    database::KubectlMariaDb,
    ledger::YamlLedger,
    paths,
    pipeline::{Clients, Pipeline, ProvisionOutcome},
    registry::TenantRegistry,
    secrets::{AgeSecretStore, DiscardSecretStore, SecretStore},
    types::{Cancellation, RawRequest},
};
use std::path::Path;

#[derive(Args)]
pub struct CreateArgs {
    /// Template to instantiate (e.g. wordpress-shared)
    #[arg(long)]
    pub template: Option<String>,
    /// Tenant domain; its first label becomes the namespace
    #[arg(long)]
    pub domain: Option<String>,
    /// Tier policy (default: `default_tier` from config)
    #[arg(long)]
    pub tier: Option<String>,
    /// Theme passed to the templates (default: `default_theme` from config)
    #[arg(long)]
    pub theme: Option<String>,
    /// Database service to use instead of the configured shared one
    #[arg(long)]
    pub database: Option<String>,
    /// Render and list the manifests without changing anything
    #[arg(long)]
    pub dry_run: bool,
    /// Re-provision a tenant that already exists
    #[arg(long)]
    pub force: bool,
}

impl CreateArgs {
    fn into_request(self) -> RawRequest {
        RawRequest {
            template: self.template,
            domain: self.domain,
            tier: self.tier,
            theme: self.theme,
            database_override: self.database,
            dry_run: self.dry_run,
            force: self.force,
        }
    }
}

pub fn run(root: &Path, args: CreateArgs, json: bool) -> anyhow::Result<()> {
    let (config, resolver) = super::load(root)?;
    let registry = TenantRegistry::open(&paths::registry_path(root))
        .context("failed to open tenant registry")?;

    let kubectl = Kubectl::new(&config.cluster);
    let database = KubectlMariaDb::new(kubectl.clone(), config.database.clone());
    let ledger = YamlLedger::new(&paths::ledger_path(root));
    let age_store;
    let secrets: &dyn SecretStore = if config.secrets.enabled {
        age_store = AgeSecretStore::new(root, config.cluster.request_timeout())
            .with_binary(config.secrets.age.clone());
        &age_store
    } else {
        &DiscardSecretStore
    };

    let cancel = Cancellation::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("interrupt received; stopping after the current step");
        handler_flag.cancel();
    }) {
        tracing::warn!("could not install Ctrl-C handler: {e}");
    }

    let clients = Clients {
        cluster: &kubectl,
        database: &database,
        secrets,
        ledger: &ledger,
    };
    let mut outcome = Pipeline::new(root, &config, &resolver, &registry, clients)
        .with_cancellation(cancel)
        .run(args.into_request());

    if json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }

    match outcome.failure.take() {
        None => Ok(()),
        Some(err) => {
            let stage = outcome
                .failed_stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "requested".to_string());
            Err(anyhow::Error::new(err).context(format!("provisioning failed during {stage}")))
        }
    }
}

fn print_outcome(outcome: &ProvisionOutcome) {
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    let Some(req) = &outcome.request else {
        return;
    };

    if let Some(report) = &outcome.apply {
        if report.dry_run {
            println!(
                "dry-run: {} (namespace {}, template {}, tier {})",
                req.domain, req.namespace, req.template, req.tier
            );
        }
        for entry in &report.entries {
            match &entry.outcome {
                ApplyOutcome::Failed { cause } => {
                    println!("  {:8} {}  {cause}", entry.outcome.label(), entry.manifest)
                }
                other => println!("  {:8} {}", other.label(), entry.manifest),
            }
        }
        if report.dry_run {
            return;
        }
    }

    if !outcome.is_complete() {
        return;
    }

    println!("\nprovisioned {}", req.domain);
    let mut fields = vec![
        ("namespace", req.namespace.clone()),
        ("template", format!("{} ({})", req.template, req.tier)),
    ];
    if let Some(db) = &outcome.database {
        let state = if db.created { "created" } else { "existing" };
        fields.push(("database", format!("{} on {} ({state})", db.database_name, db.host)));
    }
    if let Some(dir) = &outcome.manifest_dir {
        fields.push(("manifests", dir.display().to_string()));
    }
    if let Some(changed) = outcome.ledger_changed {
        let state = if changed { "registered" } else { "already registered" };
        fields.push(("ledger", state.to_string()));
    }
    print_fields(&fields);
}
