use std::path::{Path, PathBuf};

use provision_core::paths;

/// Resolve the provisioning root.
///
/// Priority:
/// 1. `--root` flag / `PROVISION_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.provision/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut dir = cwd.clone();
    loop {
        if dir.join(paths::STATE_DIR).is_dir() {
            return dir;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }

    cwd
}
