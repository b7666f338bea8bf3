#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn provision(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("provision").unwrap();
    cmd.current_dir(dir.path())
        .env("PROVISION_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_root(dir: &TempDir) {
    provision(dir).arg("init").assert().success();
}

// ---------------------------------------------------------------------------
// provision init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_state_and_template() {
    let dir = TempDir::new().unwrap();
    provision(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .provision/config.yaml"));

    assert!(dir.path().join(".provision/config.yaml").exists());
    assert!(dir.path().join(".provision/locks").is_dir());
    assert!(dir.path().join(".provision/tenants").is_dir());
    assert!(dir
        .path()
        .join("templates/wordpress-shared/tiers/shared.yaml")
        .exists());
    assert!(dir
        .path()
        .join("templates/wordpress-shared/manifests/application.yaml")
        .exists());
}

#[test]
fn init_is_idempotent_and_keeps_config() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    let config = dir.path().join(".provision/config.yaml");
    std::fs::write(&config, "default_tier: dedicated\n").unwrap();

    provision(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .provision/config.yaml"));
    assert_eq!(
        std::fs::read_to_string(&config).unwrap(),
        "default_tier: dedicated\n"
    );
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    provision(&dir)
        .args(["templates"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// templates / tiers / render
// ---------------------------------------------------------------------------

#[test]
fn templates_and_tiers_are_listed() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);

    provision(&dir)
        .arg("templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("wordpress-shared"))
        .stdout(predicate::str::contains("dedicated, enterprise, shared"));

    let out = provision(&dir)
        .args(["tiers", "wordpress-shared", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let policies: serde_yaml::Value = serde_yaml::from_slice(&out.stdout).unwrap();
    let tiers: Vec<&str> = policies
        .as_sequence()
        .unwrap()
        .iter()
        .map(|p| p["tier"].as_str().unwrap())
        .collect();
    assert_eq!(tiers, ["dedicated", "enterprise", "shared"]);
}

#[test]
fn tiers_of_unknown_template_fails() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args(["tiers", "drupal"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("drupal"));
}

#[test]
fn render_prints_manifest_stream() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args([
            "render",
            "--template=wordpress-shared",
            "--domain=test1.example.org",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("# 01-namespace.yaml"))
        .stdout(predicate::str::contains("name: test1"))
        .stdout(predicate::str::contains("test1.example.org"))
        .stdout(predicate::str::contains("# 06-kustomization.yaml"));
    // Rendering never writes tenant state.
    assert!(!dir.path().join(".provision/tenants/test1").exists());
}

#[test]
fn render_writes_files_to_out_dir() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args([
            "render",
            "--template=wordpress-shared",
            "--domain=test1.example.org",
            "--tier=dedicated",
            "--out",
            "rendered",
        ])
        .assert()
        .success();
    let app = std::fs::read_to_string(dir.path().join("rendered/03-application.yaml")).unwrap();
    assert!(app.contains("StatefulSet"));
}

// ---------------------------------------------------------------------------
// provision create (no cluster)
// ---------------------------------------------------------------------------

#[test]
fn dry_run_lists_manifests_without_state() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args([
            "create",
            "--template=wordpress-shared",
            "--domain=test1.example.org",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "dry-run: test1.example.org (namespace test1, template wordpress-shared, tier shared)",
        ))
        .stdout(predicate::str::contains("listed   namespace"))
        .stdout(predicate::str::contains("listed   kustomization"));

    assert!(!dir.path().join(".provision/tenants/test1").exists());
    assert!(!dir.path().join(".provision/ledger.yaml").exists());
}

#[test]
fn dry_run_json_reports_complete() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    let out = provision(&dir)
        .args([
            "create",
            "--template=wordpress-shared",
            "--domain=test1.example.org",
            "--dry-run",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_yaml::Value = serde_yaml::from_slice(&out.stdout).unwrap();
    assert_eq!(v["stage"].as_str(), Some("complete"));
    assert_eq!(v["request"]["namespace"].as_str(), Some("test1"));
    assert_eq!(v["manifests"].as_sequence().unwrap().len(), 6);
}

#[test]
fn invalid_domain_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args([
            "create",
            "--template=wordpress-shared",
            "--domain=-bad-.example.org",
            "--dry-run",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error: provisioning failed during validated"))
        .stderr(predicate::str::contains("rejected before any change"));
}

#[test]
fn unknown_tier_lists_available_tiers() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args([
            "create",
            "--template=wordpress-shared",
            "--domain=test1.example.org",
            "--tier=unknown",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("dedicated, enterprise, shared"));
}

#[test]
fn missing_template_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args(["create", "--domain=test1.example.org"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("template"));
}

// ---------------------------------------------------------------------------
// secrets keys / ledger / tenant
// ---------------------------------------------------------------------------

#[test]
fn secrets_keys_add_list_remove() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args(["secrets", "keys", "add", "--name", "ops", "--key", "age1qyqszqgpqyqszqgpqyqszqgp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added age key 'ops'"));
    provision(&dir)
        .args(["secrets", "keys", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ops"));
    provision(&dir)
        .args(["secrets", "keys", "add", "--name", "ops", "--key", "age1other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    provision(&dir)
        .args(["secrets", "keys", "remove", "ops"])
        .assert()
        .success();
    provision(&dir)
        .args(["secrets", "keys", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no keys configured"));
}

#[test]
fn empty_ledger_and_registry() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    provision(&dir)
        .args(["ledger", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ledger is empty"));
    provision(&dir)
        .args(["ledger", "remove", "test1.example.org"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not an active ledger entry"));
    provision(&dir)
        .args(["tenant", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no tenants provisioned"));
    provision(&dir)
        .args(["tenant", "show", "test1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tenant 'test1' not found"));
}

// ---------------------------------------------------------------------------
// provision create against a scripted kubectl
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod end_to_end {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Stands in for kubectl: answers the `get` and `exec` calls the
    /// provisioner makes and keeps databases and applied manifests under
    /// `$FAKE_KUBE_STATE`. `FAKE_KUBE_FAIL_APPLY_AT=n` fails the n-th apply.
    const FAKE_KUBECTL: &str = r#"#!/bin/sh
state="${FAKE_KUBE_STATE:?}"
while [ $# -gt 0 ]; do
  case "$1" in
    --*) shift ;;
    *) break ;;
  esac
done
cmd="$1"; shift
case "$cmd" in
  get)
    case "$1" in
      namespace) grep -qx "$2" "$state/namespaces" 2>/dev/null && echo "namespace/$2" ;;
      service) echo "service/$2" ;;
      secret) echo '{"data":{"mariadb-root-password":"cm9vdC1zZWNyZXQ="}}' ;;
    esac
    ;;
  apply)
    manifest=$(cat)
    n=$(( $(cat "$state/apply-count" 2>/dev/null || echo 0) + 1 ))
    echo "$n" > "$state/apply-count"
    if [ "$n" = "${FAKE_KUBE_FAIL_APPLY_AT:-0}" ]; then
      echo "Error from server (Forbidden): admission webhook denied the request" >&2
      exit 1
    fi
    printf '%s\n' "$manifest" >> "$state/applied.yaml"
    echo "applied"
    ;;
  exec)
    sql=$(tail -n +2)
    case "$sql" in
      *"CREATE DATABASE"*)
        echo "$sql" | sed -n 's/^CREATE DATABASE IF NOT EXISTS `\([^`]*\)`.*/\1/p' >> "$state/databases"
        echo "$sql" | sed -n "s/^GRANT ALL PRIVILEGES ON \`\([^\`]*\)\`\.\* TO '\([^']*\)'.*/\1 \2/p" >> "$state/grants"
        ;;
      *mysql.db*)
        db=$(echo "$sql" | sed -n "s/.*Db = '\([^']*\)'.*/\1/p")
        user=$(echo "$sql" | sed -n "s/.*User = '\([^']*\)'.*/\1/p")
        grep -qx "$db $user" "$state/grants" 2>/dev/null && echo "$user"
        ;;
      *SCHEMA_NAME*)
        db=$(echo "$sql" | sed -n "s/.*SCHEMA_NAME = '\([^']*\)'.*/\1/p")
        grep -x "$db" "$state/databases" 2>/dev/null
        ;;
    esac
    ;;
esac
exit 0
"#;

    struct Cluster {
        dir: TempDir,
        state: PathBuf,
    }

    impl Cluster {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            init_root(&dir);

            let state = dir.path().join("kube-state");
            std::fs::create_dir_all(&state).unwrap();
            let kubectl = dir.path().join("kubectl");
            std::fs::write(&kubectl, FAKE_KUBECTL).unwrap();
            std::fs::set_permissions(&kubectl, std::fs::Permissions::from_mode(0o755)).unwrap();

            std::fs::write(
                dir.path().join(".provision/config.yaml"),
                format!(
                    "cluster:\n  kubectl: {}\nsecrets:\n  enabled: false\nretry:\n  max_attempts: 1\n",
                    kubectl.display()
                ),
            )
            .unwrap();
            Self { dir, state }
        }

        fn create(&self, extra: &[&str]) -> Command {
            let mut cmd = provision(&self.dir);
            cmd.env("FAKE_KUBE_STATE", &self.state).args([
                "create",
                "--template=wordpress-shared",
                "--domain=test1.example.org",
                "--tier=shared",
            ]);
            cmd.args(extra);
            cmd
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.state.join(name)).unwrap_or_default()
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }
    }

    #[test]
    fn provisions_and_registers_tenant() {
        let cluster = Cluster::new();
        cluster
            .create(&[])
            .assert()
            .success()
            .stdout(predicate::str::contains("provisioned test1.example.org"))
            .stdout(predicate::str::contains("wp_test1"))
            .stdout(predicate::str::contains("registered"));

        assert_eq!(cluster.read("databases"), "wp_test1\n");
        assert_eq!(cluster.read("apply-count").trim(), "6");
        assert!(cluster.read("applied.yaml").contains("kind: Namespace"));
        assert!(cluster
            .root()
            .join(".provision/tenants/test1/01-namespace.yaml")
            .exists());

        let ledger = std::fs::read_to_string(cluster.root().join(".provision/ledger.yaml")).unwrap();
        assert!(ledger.contains("domain: test1.example.org"));

        provision(&cluster.dir)
            .args(["tenant", "show", "test1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("wp_test1"))
            .stdout(predicate::str::contains("active"));
    }

    #[test]
    fn repeat_requires_force_and_never_duplicates() {
        let cluster = Cluster::new();
        cluster.create(&[]).assert().success();

        cluster
            .create(&[])
            .assert()
            .failure()
            .code(1)
            .stderr(predicate::str::contains("already exists"));
        assert_eq!(cluster.read("apply-count").trim(), "6");

        cluster
            .create(&["--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already registered"));
        assert_eq!(cluster.read("apply-count").trim(), "12");
        assert_eq!(cluster.read("databases"), "wp_test1\n");

        let out = provision(&cluster.dir)
            .args(["ledger", "list", "--json"])
            .output()
            .unwrap();
        let entries: serde_yaml::Value = serde_yaml::from_slice(&out.stdout).unwrap();
        let domains: Vec<&str> = entries
            .as_sequence()
            .unwrap()
            .iter()
            .map(|e| e["domain"].as_str().unwrap())
            .collect();
        assert_eq!(domains, ["test1.example.org"]);
    }

    #[test]
    fn failed_apply_reports_each_manifest() {
        let cluster = Cluster::new();
        cluster
            .create(&[])
            .env("FAKE_KUBE_FAIL_APPLY_AT", "2")
            .assert()
            .failure()
            .code(1)
            .stdout(predicate::str::contains("applied  namespace"))
            .stdout(predicate::str::contains("failed   secrets"))
            .stdout(predicate::str::contains("skipped  kustomization"))
            .stderr(predicate::str::contains("apply failed at manifest 'secrets'"));

        assert_eq!(cluster.read("apply-count").trim(), "2");
        assert!(!cluster.root().join(".provision/ledger.yaml").exists());
    }
}
