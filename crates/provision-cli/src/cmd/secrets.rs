use crate::output::{print_json, print_rows};
use clap::Subcommand;
use provision_core::secrets;
use std::path::Path;

#[derive(Subcommand)]
pub enum SecretsSubcommand {
    /// Manage the age recipients tenant credentials are encrypted to
    Keys {
        #[command(subcommand)]
        subcommand: SecretsKeysSubcommand,
    },
}

#[derive(Subcommand)]
pub enum SecretsKeysSubcommand {
    /// List recipients
    List,
    /// Add a recipient (SSH public key or native age key)
    Add {
        /// Display name for this key
        #[arg(long)]
        name: String,
        /// Public key string (ssh-ed25519 ..., ssh-rsa ..., or age1...)
        #[arg(long)]
        key: String,
    },
    /// Remove a recipient by name
    Remove {
        /// Key name to remove
        name: String,
    },
}

pub fn run(root: &Path, subcommand: SecretsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        SecretsSubcommand::Keys { subcommand } => run_keys(root, subcommand, json),
    }
}

fn run_keys(root: &Path, subcommand: SecretsKeysSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        SecretsKeysSubcommand::List => {
            let keys = secrets::list_keys(root)?;
            if json {
                return print_json(&keys);
            }
            print_rows(
                &keys,
                "no keys configured\n\nAdd your key:  provision secrets keys add --name <name> --key \"$(cat ~/.ssh/id_ed25519.pub)\"",
            );
            Ok(())
        }

        SecretsKeysSubcommand::Add { name, key } => {
            let recipient = secrets::add_key(root, &name, &key)?;
            if json {
                return print_json(&recipient);
            }
            println!("added {} key '{name}'", recipient.key_type);
            println!("\nCredentials stored from now on are encrypted to this key; existing ones are not re-encrypted.");
            Ok(())
        }

        SecretsKeysSubcommand::Remove { name } => {
            secrets::remove_key(root, &name)?;
            if json {
                return print_json(&serde_json::json!({ "name": name, "removed": true }));
            }
            println!("removed key '{name}'");
            Ok(())
        }
    }
}
