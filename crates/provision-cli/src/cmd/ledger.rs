use crate::output::{print_json, print_rows};
use clap::Subcommand;
use provision_core::{
    ledger::{LedgerStore, YamlLedger},
    paths,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum LedgerSubcommand {
    /// List ledger entries, including removed ones
    List,
    /// Mark a domain removed so the reconciliation controller tears it down
    Remove {
        /// Tenant domain
        domain: String,
    },
}

pub fn run(root: &Path, subcommand: LedgerSubcommand, json: bool) -> anyhow::Result<()> {
    super::load(root)?;
    let ledger = YamlLedger::new(&paths::ledger_path(root));
    match subcommand {
        LedgerSubcommand::List => {
            let entries = ledger.entries()?;
            if json {
                return print_json(&entries);
            }
            print_rows(&entries, "ledger is empty");
            Ok(())
        }

        LedgerSubcommand::Remove { domain } => {
            if !ledger.deregister(&domain)? {
                anyhow::bail!("'{domain}' is not an active ledger entry");
            }
            if json {
                return print_json(&serde_json::json!({ "domain": domain, "removed": true }));
            }
            println!("marked '{domain}' removed");
            Ok(())
        }
    }
}
