use crate::output::print_json;
use anyhow::Context;
use provision_core::{config::Config, io, paths, scaffold};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct InitReport {
    root: String,
    config_created: bool,
    template_files_created: Vec<String>,
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    if !json {
        println!("Initializing provisioning root: {}", root.display());
    }

    for dir in [
        paths::STATE_DIR,
        paths::LOCKS_DIR,
        paths::TENANTS_DIR,
        paths::SECRETS_DIR,
    ] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    // An existing config is never rewritten; it may carry local edits.
    let config_created = !paths::config_path(root).exists();
    let config = if config_created {
        let cfg = Config::default();
        cfg.save(root).context("failed to write config.yaml")?;
        cfg
    } else {
        Config::load(root).context("failed to load .provision/config.yaml")?
    };

    let templates = config.templates_path(root);
    let created = scaffold::write_demo_template(&templates)
        .with_context(|| format!("failed to write templates under {}", templates.display()))?;

    if json {
        return print_json(&InitReport {
            root: root.display().to_string(),
            config_created,
            template_files_created: created,
        });
    }

    if config_created {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }
    if created.is_empty() {
        println!("  exists:  template '{}'", scaffold::DEMO_TEMPLATE);
    } else {
        for file in &created {
            println!("  created: {}/{file}", config.templates_dir.display());
        }
    }
    println!("\nNext: provision create --template={} --domain=<fqdn> --dry-run", scaffold::DEMO_TEMPLATE);
    Ok(())
}
