//! Manifest rendering.
//!
//! Each `templates/<template>/manifests/<kind>.yaml` is a handlebars template
//! rendered against a [`RenderContext`]. The engine runs in strict mode, so a
//! reference to a variable the context does not carry is an error rather than
//! an empty string. Output order is the [`ManifestKind`] order regardless of
//! directory listing order.

use std::path::Path;

use handlebars::{Handlebars, RenderErrorReason};
use serde::Serialize;

use crate::error::{ProvisionError, Result};
use crate::io;
use crate::paths;
use crate::tier::{RateLimit, ResourceSpec, TierPolicy};
use crate::types::{ManifestKind, TenantRequest};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseContext {
    pub name: String,
    pub host: String,
    pub user: String,
    /// True when the tenant runs its own MariaDB alongside the application.
    pub dedicated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceContext {
    pub enabled: bool,
    pub size: String,
}

/// Names of the cluster secrets the manifests reference. Only names; the
/// values never pass through rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretNames {
    pub database: String,
}

/// Every variable a manifest template may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderContext {
    pub namespace: String,
    pub domain: String,
    pub tier: String,
    pub template: String,
    pub theme: String,
    pub database: DatabaseContext,
    pub persistence: PersistenceContext,
    pub resources: ResourceSpec,
    /// `null` unless the tier runs a dedicated database.
    pub database_resources: Option<ResourceSpec>,
    pub rate_limit: RateLimit,
    pub secrets: SecretNames,
}

impl RenderContext {
    /// `database_host` is where the application reaches its database; see
    /// [`crate::database::database_host`].
    pub fn new(request: &TenantRequest, policy: &TierPolicy, database_host: String) -> Self {
        let database_name = request.database_name();
        Self {
            namespace: request.namespace.clone(),
            domain: request.domain.clone(),
            tier: request.tier.clone(),
            template: request.template.clone(),
            theme: request.theme.clone(),
            database: DatabaseContext {
                user: database_name.clone(),
                name: database_name,
                host: database_host,
                dedicated: policy.mariadb_enabled,
            },
            persistence: PersistenceContext {
                enabled: policy.persistence_enabled,
                size: policy.storage_size.clone(),
            },
            resources: policy.resources.clone(),
            database_resources: policy.db_resources.clone(),
            rate_limit: policy.rate_limit,
            secrets: SecretNames {
                database: database_secret_name(&request.namespace),
            },
        }
    }
}

/// Cluster secret holding the tenant's database credentials.
pub fn database_secret_name(namespace: &str) -> String {
    format!("{namespace}-database")
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub name: String,
    pub content: String,
}

impl Manifest {
    /// `02-secrets.yaml`: position-prefixed so a directory listing keeps apply order.
    pub fn file_name(&self) -> String {
        format!("{:02}-{}.yaml", self.kind.index() + 1, self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestSet {
    pub manifests: Vec<Manifest>,
}

impl ManifestSet {
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Manifest> {
        self.manifests.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.manifests.iter().map(|m| m.name.as_str()).collect()
    }

    /// The whole set as one multi-document YAML stream.
    pub fn to_stream(&self) -> String {
        self.manifests
            .iter()
            .map(|m| format!("---\n# {}\n{}", m.file_name(), m.content))
            .collect()
    }

    /// Persist as `NN-<kind>.yaml` files in `dir`. YAML files from an earlier
    /// render that are not part of this set are removed.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        io::ensure_dir(dir)?;
        let keep: Vec<String> = self.manifests.iter().map(Manifest::file_name).collect();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path.extension().is_some_and(|e| e == "yaml");
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if is_yaml && file_name.is_some_and(|n| !keep.contains(&n)) {
                std::fs::remove_file(&path)?;
            }
        }
        for manifest in &self.manifests {
            io::atomic_write(&dir.join(manifest.file_name()), manifest.content.as_bytes())?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ManifestSet {
    type Item = &'a Manifest;
    type IntoIter = std::slice::Iter<'a, Manifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.manifests.iter()
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn engine() -> Handlebars<'static> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(true);
    hb.register_escape_fn(handlebars::no_escape);
    hb
}

/// Render every manifest document of `template_dir` against `ctx`.
pub fn render(ctx: &RenderContext, template_dir: &Path) -> Result<ManifestSet> {
    let manifests_dir = template_dir.join(paths::MANIFESTS_SUBDIR);
    let stems = io::list_stems(&manifests_dir, "yaml")?;
    if stems.is_empty() {
        return Err(ProvisionError::Render {
            document: ctx.template.clone(),
            reason: format!("no manifest documents in {}", manifests_dir.display()),
        });
    }

    let mut documents = Vec::with_capacity(stems.len());
    for stem in stems {
        let kind: ManifestKind = stem.parse().map_err(|reason| ProvisionError::Render {
            document: stem.clone(),
            reason,
        })?;
        documents.push(kind);
    }
    documents.sort();

    let hb = engine();
    let mut manifests = Vec::with_capacity(documents.len());
    for kind in documents {
        let source = std::fs::read_to_string(manifests_dir.join(format!("{kind}.yaml")))?;
        let mut content = render_document(&hb, kind.as_str(), &source, ctx)?;
        if !content.ends_with('\n') {
            content.push('\n');
        }
        manifests.push(Manifest {
            kind,
            name: kind.as_str().to_string(),
            content,
        });
    }
    Ok(ManifestSet { manifests })
}

fn render_document(
    hb: &Handlebars<'static>,
    document: &str,
    source: &str,
    ctx: &RenderContext,
) -> Result<String> {
    hb.render_template(source, ctx).map_err(|e| match e.reason() {
        RenderErrorReason::MissingVariable(Some(path)) => ProvisionError::UnresolvedPlaceholder {
            document: document.to_string(),
            placeholder: path.clone(),
        },
        _ => ProvisionError::Render {
            document: document.to_string(),
            reason: e.to_string(),
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
