// Read-only inspection commands over a registry snapshot. The RPC transport
// is out of scope; this is the operator's window into the store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::auth::AuthContext;
use crate::config::RegistryConfig;
use crate::methods::NoopMethodCatalog;
use crate::registration::{LogSlice, UnconfiguredOrchestrator};
use crate::registry::Registry;
use crate::store::{BuildFilter, InMemoryStore, ModuleListFilter, ModuleSelector};

#[derive(Parser)]
#[command(name = "module-registry", about = "Inspect a module registry snapshot")]
pub struct Cli {
    /// Snapshot file to read; defaults to the configured storage path.
    #[arg(long, global = true)]
    pub snapshot: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List modules.
    List {
        #[arg(long)]
        include_unreleased: bool,
        #[arg(long)]
        include_disabled: bool,
    },
    /// Show a module's registration and release state.
    Status { module: String },
    /// Show a module's identity, owners, and tagged versions.
    Info { module: String },
    /// Show a module's released version history.
    Versions { module: String },
    /// Show modules with a release request under review.
    Releases,
    /// List registration attempts.
    Builds {
        #[arg(long)]
        running: bool,
        #[arg(long)]
        complete: bool,
        #[arg(long)]
        error: bool,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a build log.
    Log {
        registration_id: String,
        /// Structured output with the status header instead of raw text.
        #[arg(long)]
        parsed: bool,
        #[arg(long)]
        skip: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        first_n: Option<usize>,
        #[arg(long)]
        last_n: Option<usize>,
    },
}

/// Module CLI arguments accept either a name or a git URL.
fn selector(arg: &str) -> ModuleSelector {
    if arg.contains("://") {
        ModuleSelector::by_url(arg)
    } else {
        ModuleSelector::by_name(arg)
    }
}

pub async fn run(cli: Cli, config: RegistryConfig) -> Result<()> {
    let snapshot = cli
        .snapshot
        .or(config.storage.snapshot_path)
        .context("no snapshot path given; pass --snapshot or set storage.snapshot_path")?;
    let store = Arc::new(
        InMemoryStore::open(&snapshot)
            .await
            .with_context(|| format!("could not open snapshot {}", snapshot.display()))?,
    );
    let registry = Registry::new(
        store,
        Arc::new(UnconfiguredOrchestrator),
        Arc::new(NoopMethodCatalog),
        AuthContext::new(config.auth.admins),
        config.registration.scratch_dir,
    );

    match cli.command {
        Command::List {
            include_unreleased,
            include_disabled,
        } => {
            let filter = ModuleListFilter {
                include_released: true,
                include_unreleased,
                include_disabled,
            };
            print_json(&registry.list_basic_module_info(&filter).await?)
        }
        Command::Status { module } => {
            print_json(&registry.get_module_state(&selector(&module)).await?)
        }
        Command::Info { module } => {
            print_json(&registry.get_module_info(&selector(&module)).await?)
        }
        Command::Versions { module } => {
            print_json(&registry.list_released_versions(&selector(&module)).await?)
        }
        Command::Releases => print_json(&registry.list_requested_releases().await?),
        Command::Builds {
            running,
            complete,
            error,
            skip,
            limit,
        } => {
            let filter = BuildFilter {
                only_running: running,
                only_complete: complete,
                only_error: error,
                modules: vec![],
                skip,
                limit,
            };
            print_json(&registry.list_builds(&filter).await?)
        }
        Command::Log {
            registration_id,
            parsed,
            skip,
            limit,
            first_n,
            last_n,
        } => {
            let slice = LogSlice::from_query(skip, limit, first_n, last_n)?;
            if parsed {
                print_json(&registry.get_parsed_build_log(&registration_id, slice).await?)
            } else {
                print!("{}", registry.get_build_log(&registration_id, slice).await?);
                Ok(())
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    if rendered == "null" {
        bail!("not found");
    }
    println!("{rendered}");
    Ok(())
}
