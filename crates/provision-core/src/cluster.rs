//! Cluster control plane access.
//!
//! The pipeline only needs two things from the cluster: "does this namespace
//! exist" and "apply this document". [`ClusterClient`] captures exactly that
//! so tests and dry-run can stand in for a real cluster. [`Kubectl`] is the
//! production implementation and also carries the lower-level helpers the
//! shared-database client uses (`get`, `get secret`, `exec`).

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;

use crate::config::ClusterConfig;
use crate::error::ClientError;
use crate::exec::{self, CommandSpec};
use crate::render::Manifest;

/// Extra time granted to the kubectl process beyond its own request timeout,
/// so kubectl's error surfaces before the process deadline kills it.
const PROCESS_GRACE: Duration = Duration::from_secs(5);

pub trait ClusterClient {
    fn namespace_exists(&self, namespace: &str) -> Result<bool, ClientError>;

    /// Server-side idempotent apply of one rendered document.
    fn apply(&self, manifest: &Manifest) -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
pub struct Kubectl {
    program: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
}

impl Kubectl {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            program: config.kubectl.clone(),
            context: config.context.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// The binary is resolved per call so that constructing a client never
    /// fails on hosts without kubectl (dry-run never reaches it).
    fn command(&self, label: impl Into<String>) -> Result<CommandSpec, ClientError> {
        let program = exec::find_program("kubectl", self.program.as_deref())?;
        let mut spec = CommandSpec::new(program, label, self.timeout + PROCESS_GRACE)
            .arg(format!("--request-timeout={}s", self.timeout.as_secs()));
        if let Some(ctx) = &self.context {
            spec = spec.arg(format!("--context={ctx}"));
        }
        Ok(spec)
    }

    /// True when `kind/name` exists. Uses `--ignore-not-found` so absence is
    /// an empty answer rather than an error.
    pub fn exists(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<bool, ClientError> {
        let mut spec = self
            .command(format!("kubectl get {kind} {name}"))?
            .args(["get", kind, name, "--ignore-not-found", "-o", "name"]);
        if let Some(ns) = namespace {
            spec = spec.args(["-n", ns]);
        }
        let out = exec::run(&spec)?;
        Ok(!out.stdout.trim().is_empty())
    }

    /// Decoded value of `key` in secret `namespace/name`; `None` when the
    /// secret or the key is absent.
    pub fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, ClientError> {
        let label = format!("kubectl get secret {namespace}/{name}");
        let spec = self.command(&label)?.args([
            "get",
            "secret",
            name,
            "-n",
            namespace,
            "--ignore-not-found",
            "-o",
            "json",
        ]);
        let out = exec::run(&spec)?;
        if out.stdout.trim().is_empty() {
            return Ok(None);
        }
        decode_secret_key(&out.stdout, key).map_err(|e| ClientError::permanent(label, e))
    }

    /// Run `command` inside a pod selected by `target` (e.g. `svc/mariadb-shared`).
    pub fn exec(
        &self,
        namespace: &str,
        target: &str,
        command: &[&str],
        stdin: &str,
        label: &str,
    ) -> Result<String, ClientError> {
        let spec = self
            .command(label)?
            .args(["exec", "-i", "-n", namespace, target, "--"])
            .args(command.iter().copied())
            .stdin(stdin);
        Ok(exec::run(&spec)?.stdout)
    }
}

impl ClusterClient for Kubectl {
    fn namespace_exists(&self, namespace: &str) -> Result<bool, ClientError> {
        self.exists("namespace", namespace, None)
    }

    fn apply(&self, manifest: &Manifest) -> Result<(), ClientError> {
        let spec = self
            .command(format!("kubectl apply {}", manifest.name))?
            .args(["apply", "-f", "-"])
            .stdin(manifest.content.clone());
        exec::run(&spec).map(|_| ())
    }
}

fn decode_secret_key(json: &str, key: &str) -> Result<Option<String>, String> {
    let doc: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("unreadable secret: {e}"))?;
    let Some(encoded) = doc.get("data").and_then(|d| d.get(key)).and_then(|v| v.as_str()) else {
        return Ok(None);
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("secret key '{key}' is not valid base64: {e}"))?;
    let value = String::from_utf8(bytes).map_err(|e| format!("secret key '{key}': {e}"))?;
    Ok(Some(value.trim_end_matches('\n').to_string()).filter(|v| !v.is_empty()))
}
