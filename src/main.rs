//! Binary entry point for orgdeep.
//!
//! This binary provides the CLI interface for the hierarchy deep-read
//! engine: build, activate and prune deep-read tables, query relations, and
//! materialize reporting nodes.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI error output
#![allow(clippy::print_stderr)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use orgdeep::cli::{self, QueryDirection};
use orgdeep::services::Engine;
use orgdeep::{OrgdeepConfig, observability};
use std::process::ExitCode;

/// Orgdeep - bitemporal organizational-hierarchy deep-read engine.
#[derive(Parser)]
#[command(name = "orgdeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Path to the SQLite database (overrides config).
    #[arg(long, global = true, env = "ORGDEEP_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Temporal closure build/activate/prune.
    Closure {
        #[command(subcommand)]
        command: ClosureCommands,
    },

    /// Date-pinned snapshot builds.
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },

    /// Reporting-node materialization.
    Reporting {
        #[command(subcommand)]
        command: ReportingCommands,
    },

    /// Deep-read relation queries.
    Query {
        #[command(subcommand)]
        command: QueryCommands,
    },

    /// Build registry inspection.
    Builds {
        #[command(subcommand)]
        command: BuildsCommands,
    },
}

/// Closure lifecycle commands.
#[derive(Subcommand)]
enum ClosureCommands {
    /// Build and (with --apply) activate the temporal closure table.
    Build {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,

        /// Apply changes (default dry-run).
        #[arg(long)]
        apply: bool,

        /// Source request id (optional).
        #[arg(long = "request-id")]
        request_id: Option<String>,
    },

    /// Activate a ready closure build (rollback by activating a previous build).
    Activate {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,

        /// Build UUID.
        #[arg(long = "build-id")]
        build_id: String,
    },

    /// Prune non-active closure builds (keeps N newest including active).
    Prune {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,

        /// How many builds to keep (>=1).
        #[arg(long, default_value_t = 2)]
        keep: usize,

        /// Apply changes (default dry-run).
        #[arg(long)]
        apply: bool,
    },
}

/// Snapshot build commands.
#[derive(Subcommand)]
enum SnapshotCommands {
    /// Build and (with --apply) activate a snapshot for one date.
    Build {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,

        /// Calendar date the snapshot freezes (YYYY-MM-DD).
        #[arg(long = "as-of-date")]
        as_of_date: String,

        /// Apply changes (default dry-run).
        #[arg(long)]
        apply: bool,

        /// Source request id (optional).
        #[arg(long = "request-id")]
        request_id: Option<String>,
    },
}

/// Reporting materialization commands.
#[derive(Subcommand)]
enum ReportingCommands {
    /// Materialize reporting nodes from the active snapshot build.
    Build {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,

        /// Calendar date of the underlying snapshot (YYYY-MM-DD).
        #[arg(long = "as-of-date")]
        as_of_date: String,

        /// Resolve inherited security-group keys onto rows.
        #[arg(long = "include-security-groups")]
        include_security_groups: bool,

        /// Attach linked-object summaries to rows.
        #[arg(long = "include-links")]
        include_links: bool,

        /// Apply changes (default dry-run).
        #[arg(long)]
        apply: bool,
    },
}

/// Deep-read query commands.
#[derive(Subcommand)]
enum QueryCommands {
    /// List a node's ancestors.
    Ancestors {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,

        /// Node UUID.
        #[arg(long)]
        node: String,

        /// Valid-time date (YYYY-MM-DD, default today).
        #[arg(long = "as-of-date")]
        as_of_date: Option<String>,

        /// Backend: edges, closure or snapshot (default from config).
        #[arg(long)]
        backend: Option<String>,
    },

    /// List a node's descendants.
    Descendants {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,

        /// Node UUID.
        #[arg(long)]
        node: String,

        /// Valid-time date (YYYY-MM-DD, default today).
        #[arg(long = "as-of-date")]
        as_of_date: Option<String>,

        /// Backend: edges, closure or snapshot (default from config).
        #[arg(long)]
        backend: Option<String>,
    },
}

/// Registry inspection commands.
#[derive(Subcommand)]
enum BuildsCommands {
    /// List registry rows with status and age.
    List {
        /// Tenant UUID.
        #[arg(long)]
        tenant: String,

        /// Hierarchy type.
        #[arg(long, default_value = "OrgUnit")]
        hierarchy: String,
    },
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init(cli.verbose);

    let mut config = OrgdeepConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db.into();
    }
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let engine = Engine::open(&config)?;

    match cli.command {
        Commands::Closure { command } => match command {
            ClosureCommands::Build {
                tenant,
                hierarchy,
                apply,
                request_id,
            } => cli::closure_build(&engine, &tenant, &hierarchy, apply, request_id)?,
            ClosureCommands::Activate {
                tenant,
                hierarchy,
                build_id,
            } => cli::closure_activate(&engine, &tenant, &hierarchy, &build_id)?,
            ClosureCommands::Prune {
                tenant,
                hierarchy,
                keep,
                apply,
            } => cli::closure_prune(&engine, &tenant, &hierarchy, keep, apply)?,
        },
        Commands::Snapshot { command } => match command {
            SnapshotCommands::Build {
                tenant,
                hierarchy,
                as_of_date,
                apply,
                request_id,
            } => cli::snapshot_build(&engine, &tenant, &hierarchy, &as_of_date, apply, request_id)?,
        },
        Commands::Reporting { command } => match command {
            ReportingCommands::Build {
                tenant,
                hierarchy,
                as_of_date,
                include_security_groups,
                include_links,
                apply,
            } => cli::reporting_build(
                &engine,
                &tenant,
                &hierarchy,
                &as_of_date,
                include_security_groups,
                include_links,
                apply,
            )?,
        },
        Commands::Query { command } => match command {
            QueryCommands::Ancestors {
                tenant,
                hierarchy,
                node,
                as_of_date,
                backend,
            } => cli::query_relations(
                &engine,
                QueryDirection::Ancestors,
                &tenant,
                &hierarchy,
                &node,
                as_of_date.as_deref(),
                backend.as_deref(),
            )?,
            QueryCommands::Descendants {
                tenant,
                hierarchy,
                node,
                as_of_date,
                backend,
            } => cli::query_relations(
                &engine,
                QueryDirection::Descendants,
                &tenant,
                &hierarchy,
                &node,
                as_of_date.as_deref(),
                backend.as_deref(),
            )?,
        },
        Commands::Builds { command } => match command {
            BuildsCommands::List { tenant, hierarchy } => {
                cli::builds_list(&engine, &tenant, &hierarchy)?;
            },
        },
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}
