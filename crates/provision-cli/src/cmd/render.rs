use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use provision_core::{
    pipeline,
    render::ManifestSet,
    tier::TierPolicy,
    types::{RawRequest, TenantRequest},
};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct RenderArgs {
    /// Template to instantiate
    #[arg(long)]
    pub template: Option<String>,
    /// Tenant domain
    #[arg(long)]
    pub domain: Option<String>,
    /// Tier policy (default: `default_tier` from config)
    #[arg(long)]
    pub tier: Option<String>,
    /// Theme passed to the templates
    #[arg(long)]
    pub theme: Option<String>,
    /// Database service to use instead of the configured shared one
    #[arg(long)]
    pub database: Option<String>,
    /// Also write the set as NN-<kind>.yaml files into this directory
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Serialize)]
struct RenderReport<'a> {
    request: &'a TenantRequest,
    policy: &'a TierPolicy,
    #[serde(flatten)]
    set: &'a ManifestSet,
}

pub fn run(root: &Path, args: RenderArgs, json: bool) -> anyhow::Result<()> {
    let (config, resolver) = super::load(root)?;
    let raw = RawRequest {
        template: args.template,
        domain: args.domain,
        tier: args.tier,
        theme: args.theme,
        database_override: args.database,
        dry_run: true,
        force: false,
    };
    let (request, policy, set) = pipeline::preview(raw, &config, &resolver)?;

    if let Some(dir) = &args.out {
        set.write_to(dir)
            .with_context(|| format!("failed to write manifests to {}", dir.display()))?;
    }

    if json {
        return print_json(&RenderReport {
            request: &request,
            policy: &policy,
            set: &set,
        });
    }
    print!("{}", set.to_stream());
    Ok(())
}
