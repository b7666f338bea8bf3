use crate::output::{print_fields, print_json, print_rows};
use anyhow::Context;
use clap::Subcommand;
use provision_core::{
    io,
    ledger::{LedgerEntry, LedgerStore, YamlLedger},
    paths,
    registry::{TenantRecord, TenantRegistry},
    secrets,
};
use serde::Serialize;
use std::path::Path;

#[derive(Subcommand)]
pub enum TenantSubcommand {
    /// List provisioned tenants
    List,
    /// Show a tenant's record, rendered manifests, credentials and ledger entry
    Show {
        /// Tenant namespace
        namespace: String,
    },
}

#[derive(Serialize)]
struct TenantDetail {
    #[serde(flatten)]
    record: TenantRecord,
    manifests: Vec<String>,
    credentials: Vec<String>,
    ledger: Option<LedgerEntry>,
}

pub fn run(root: &Path, subcommand: TenantSubcommand, json: bool) -> anyhow::Result<()> {
    super::load(root)?;
    let registry = TenantRegistry::open(&paths::registry_path(root))
        .context("failed to open tenant registry")?;
    match subcommand {
        TenantSubcommand::List => list(&registry, json),
        TenantSubcommand::Show { namespace } => show(root, &registry, &namespace, json),
    }
}

fn list(registry: &TenantRegistry, json: bool) -> anyhow::Result<()> {
    let records = registry.list()?;
    if json {
        return print_json(&records);
    }
    print_rows(&records, "no tenants provisioned");
    Ok(())
}

fn show(root: &Path, registry: &TenantRegistry, namespace: &str, json: bool) -> anyhow::Result<()> {
    let record = registry
        .get(namespace)?
        .with_context(|| format!("tenant '{namespace}' not found"))?;
    let manifests = io::list_stems(&paths::tenant_manifest_dir(root, namespace), "yaml")?;
    let credentials = secrets::stored_names(root, namespace)?;
    let ledger = YamlLedger::new(&paths::ledger_path(root))
        .entries()?
        .into_iter()
        .find(|e| e.domain == record.domain);

    let detail = TenantDetail {
        record,
        manifests,
        credentials,
        ledger,
    };
    if json {
        return print_json(&detail);
    }

    let r = &detail.record;
    println!("{}", r.domain);
    let ledger_state = match &detail.ledger {
        Some(e) if e.is_active() => "active".to_string(),
        Some(e) => match e.removed_at {
            Some(at) => format!("removed {}", at.format("%Y-%m-%d %H:%M")),
            None => "removed".to_string(),
        },
        None => "not registered".to_string(),
    };
    let or_none = |v: &[String]| {
        if v.is_empty() {
            "-".to_string()
        } else {
            v.join(", ")
        }
    };
    print_fields(&[
        ("namespace", r.namespace.clone()),
        ("template", r.template.clone()),
        ("tier", r.tier.clone()),
        ("database", r.database_name.clone()),
        ("created", r.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ("updated", r.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ("manifests", or_none(detail.manifests.as_slice())),
        ("credentials", or_none(detail.credentials.as_slice())),
        ("ledger", ledger_state),
    ]);
    Ok(())
}
