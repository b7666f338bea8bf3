//! Bundled `wordpress-shared` template, written by `provision init`.

use std::path::Path;

use crate::error::Result;
use crate::{io, paths};

pub const DEMO_TEMPLATE: &str = "wordpress-shared";

pub const TIERS: &[(&str, &str)] = &[
    (
        "shared",
        include_str!("../templates/wordpress-shared/tiers/shared.yaml"),
    ),
    (
        "dedicated",
        include_str!("../templates/wordpress-shared/tiers/dedicated.yaml"),
    ),
    (
        "enterprise",
        include_str!("../templates/wordpress-shared/tiers/enterprise.yaml"),
    ),
];

pub const MANIFESTS: &[(&str, &str)] = &[
    (
        "namespace",
        include_str!("../templates/wordpress-shared/manifests/namespace.yaml"),
    ),
    (
        "secrets",
        include_str!("../templates/wordpress-shared/manifests/secrets.yaml"),
    ),
    (
        "application",
        include_str!("../templates/wordpress-shared/manifests/application.yaml"),
    ),
    (
        "ingress",
        include_str!("../templates/wordpress-shared/manifests/ingress.yaml"),
    ),
    (
        "automation",
        include_str!("../templates/wordpress-shared/manifests/automation.yaml"),
    ),
    (
        "kustomization",
        include_str!("../templates/wordpress-shared/manifests/kustomization.yaml"),
    ),
];

/// Write the bundled template under `templates`, leaving existing files
/// untouched. Returns the paths that were created, relative to `templates`.
pub fn write_demo_template(templates: &Path) -> Result<Vec<String>> {
    let dir = paths::template_dir(templates, DEMO_TEMPLATE);
    let mut created = Vec::new();
    let files = TIERS
        .iter()
        .map(|(name, body)| (paths::TIERS_SUBDIR, name, body))
        .chain(
            MANIFESTS
                .iter()
                .map(|(name, body)| (paths::MANIFESTS_SUBDIR, name, body)),
        );
    for (subdir, name, body) in files {
        let rel = format!("{DEMO_TEMPLATE}/{subdir}/{name}.yaml");
        if io::write_if_missing(&dir.join(subdir).join(format!("{name}.yaml")), body.as_bytes())? {
            created.push(rel);
        }
    }
    Ok(created)
}
