pub mod create;
pub mod init;
pub mod ledger;
pub mod render;
pub mod secrets;
pub mod templates;
pub mod tenant;

use anyhow::Context;
use provision_core::config::Config;
use provision_core::tier::TierResolver;
use std::path::Path;

/// Load the configuration and a resolver over its templates directory.
pub(crate) fn load(root: &Path) -> anyhow::Result<(Config, TierResolver)> {
    let config = Config::load(root).context("failed to load .provision/config.yaml")?;
    let resolver = TierResolver::new(config.templates_path(root));
    Ok((config, resolver))
}
