use crate::output::{print_json, print_rows, Row};
use anyhow::Context;
use provision_core::tier::TierPolicy;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct TemplateSummary {
    name: String,
    tiers: Vec<String>,
}

impl Row for TemplateSummary {
    const HEADERS: &'static [&'static str] = &["TEMPLATE", "TIERS"];

    fn cells(&self) -> Vec<String> {
        vec![self.name.clone(), self.tiers.join(", ")]
    }
}

pub fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, resolver) = super::load(root)?;
    let templates = resolver.list_templates().with_context(|| {
        format!("failed to list templates in {}", resolver.templates_dir().display())
    })?;
    let summaries = templates
        .into_iter()
        .map(|name| -> anyhow::Result<TemplateSummary> {
            let tiers = resolver.list_tiers(&name)?;
            Ok(TemplateSummary { name, tiers })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if json {
        return print_json(&summaries);
    }
    print_rows(
        &summaries,
        &format!("no templates in {}", resolver.templates_dir().display()),
    );
    Ok(())
}

pub fn tiers(root: &Path, template: &str, json: bool) -> anyhow::Result<()> {
    let (_, resolver) = super::load(root)?;
    resolver.require_template(template)?;
    let policies = resolver
        .list_tiers(template)?
        .iter()
        .map(|tier| resolver.resolve(template, tier))
        .collect::<Result<Vec<TierPolicy>, _>>()?;

    if json {
        return print_json(&policies);
    }
    print_rows(&policies, &format!("template '{template}' defines no tiers"));
    Ok(())
}
