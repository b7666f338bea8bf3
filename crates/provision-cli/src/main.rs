mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use provision_core::ProvisionError;
use std::path::PathBuf;

use cmd::create::CreateArgs;
use cmd::ledger::LedgerSubcommand;
use cmd::render::RenderArgs;
use cmd::secrets::SecretsSubcommand;
use cmd::tenant::TenantSubcommand;

#[derive(Parser)]
#[command(
    name = "provision",
    about = "Provision tenant deployments from templates and tier policies",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the provisioning root (default: auto-detect)
    #[arg(long, global = true, env = "PROVISION_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, short = 'j', global = true)]
    json: bool,

    /// Debug-level diagnostics on stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration, state directories and the bundled template
    Init,

    /// Provision a tenant: validate, render, create its database, apply, register
    Create(CreateArgs),

    /// Print the manifest set a create would apply, without touching anything
    Render(RenderArgs),

    /// List templates
    Templates,

    /// List the tiers defined for a template
    Tiers {
        /// Template name
        template: String,
    },

    /// Inspect provisioned tenants
    Tenant {
        #[command(subcommand)]
        subcommand: TenantSubcommand,
    },

    /// Inspect or edit the desired-state ledger
    Ledger {
        #[command(subcommand)]
        subcommand: LedgerSubcommand,
    },

    /// Manage recipients for encrypted tenant credentials
    Secrets {
        #[command(subcommand)]
        subcommand: SecretsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Create(args) => cmd::create::run(&root, args, cli.json),
        Commands::Render(args) => cmd::render::run(&root, args, cli.json),
        Commands::Templates => cmd::templates::list(&root, cli.json),
        Commands::Tiers { template } => cmd::templates::tiers(&root, &template, cli.json),
        Commands::Tenant { subcommand } => cmd::tenant::run(&root, subcommand, cli.json),
        Commands::Ledger { subcommand } => cmd::ledger::run(&root, subcommand, cli.json),
        Commands::Secrets { subcommand } => cmd::secrets::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let input_error = e
            .chain()
            .filter_map(|c| c.downcast_ref::<ProvisionError>())
            .any(ProvisionError::is_input_error);
        if input_error {
            eprintln!("note: the request was rejected before any change was made");
        }
        std::process::exit(1);
    }
}
