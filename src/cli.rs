use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::{Command, CommandRequest};

#[derive(Parser, Debug)]
#[command(
    name = "pod-admin",
    about = "Admin tasks for ClickHouse and PostgreSQL pods in a Kubernetes cluster",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Kubeconfig context to use (default: config file, then current context)
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Path to the TOML config file (default: config/pod-admin.toml, or $POD_ADMIN_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Print logs to stdout instead of a pager; sql reads from stdin without a TTY
    #[arg(long, global = true)]
    pub no_pager: bool,

    /// Append this run's commands and output to the given file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Print per-pod results as JSON on stdout; tables and logs move to stderr
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct Target {
    /// Pod name, `all`, or `namespace/pod`
    #[arg(value_name = "POD|all|NAMESPACE/POD")]
    pub target: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install troubleshooting tools in the pod (apt-get or yum)
    #[command(name = "install-tools")]
    InstallTools(Target),

    /// Open a clickhouse-client or psql session in the pod
    Sql(Target),

    /// Show fatal/error excerpts from the database logs
    #[command(name = "crashlog")]
    CrashLog(Target),

    /// Page through the database log
    Log(Target),

    /// List user tables with engine, size, rows and keys (ClickHouse)
    #[command(name = "schemacheck")]
    SchemaCheck(Target),

    /// Summarize active parts per table (ClickHouse)
    #[command(name = "datacheck")]
    DataCheck(Target),

    /// List grants of the viewer principal (ClickHouse)
    #[command(name = "grantcheck")]
    GrantCheck(Target),

    /// Ping, query, catalog and replica health probe (ClickHouse)
    #[command(name = "healthcheck")]
    HealthCheck(Target),

    /// List discovered ClickHouse and PostgreSQL pods
    List,
}

impl Commands {
    /// The pod action this subcommand maps to; `None` for `list`.
    pub fn request(&self) -> Option<CommandRequest> {
        let (command, target) = match self {
            Commands::InstallTools(t) => (Command::InstallTools, t),
            Commands::Sql(t) => (Command::Sql, t),
            Commands::CrashLog(t) => (Command::CrashLog, t),
            Commands::Log(t) => (Command::Log, t),
            Commands::SchemaCheck(t) => (Command::SchemaCheck, t),
            Commands::DataCheck(t) => (Command::DataCheck, t),
            Commands::GrantCheck(t) => (Command::GrantCheck, t),
            Commands::HealthCheck(t) => (Command::HealthCheck, t),
            Commands::List => return None,
        };
        Some(CommandRequest {
            command,
            target_spec: target.target.clone(),
        })
    }
}

/// Parse arguments. Help exits 0; every other parse problem prints usage and exits 1.
pub fn parse() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    }
}
