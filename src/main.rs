mod cli;
mod clickhouse;
mod config;
mod dispatch;
mod error;
mod exec;
mod k8s;
mod kubectl;
mod pods;
mod postgres;
mod progress;
mod report;
mod retry;
mod runlog;
#[cfg(test)]
mod testing;
mod types;
mod viewer;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use cli::Cli;
use dispatch::Dispatcher;
use error::AdminError;
use kubectl::{Kubectl, LoggedExec};
use pods::{KubePodSource, Resolver};
use retry::ThreadSleeper;
use runlog::RunLog;
use types::{CommandRequest, ExecutionResult, Outcome};

fn main() {
    let cli = cli::parse();
    init_tracing(cli.verbose);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pod_admin=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load config, open the run log and execute the command. Returns the process exit code.
fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("POD_ADMIN_CONFIG").map(PathBuf::from));
    let mut cfg = config::load_or_default(config_path.as_deref())?;
    cfg.apply_env(|key| std::env::var(key).ok());
    if let Some(ctx) = &cli.context {
        cfg.context = Some(ctx.clone());
    }
    if let Some(path) = &cli.log_file {
        cfg.run_log = Some(path.clone());
    }
    cfg.validate()?;
    tracing::debug!(context = ?cfg.context, run_log = ?cfg.run_log, "configuration loaded");

    let run_log = match &cfg.run_log {
        Some(path) => RunLog::open(path)?,
        None => RunLog::disabled(),
    };
    if run_log.is_enabled() {
        tracing::debug!("run log enabled");
    }
    let argv: Vec<String> = std::env::args().collect();
    run_log.run_started(&argv);

    let code = match execute(cli, &cfg, &run_log) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            run_log.record_error(&format!("{e:#}"));
            1
        }
    };
    run_log.run_finished(code);
    Ok(code)
}

fn execute(cli: &Cli, cfg: &config::Config, run_log: &RunLog) -> anyhow::Result<i32> {
    let source = KubePodSource::new(cfg.context.clone());
    let resolver = Resolver::new(&source);

    let Some(CommandRequest {
        command,
        target_spec,
    }) = cli.command.request()
    else {
        let pods = resolver.resolve("all")?;
        if cli.json {
            report::print_json(&pods)?;
        } else {
            report::print_candidates(&pods);
        }
        return Ok(0);
    };

    let targets = resolver.resolve(&target_spec)?;
    if targets.is_empty() {
        eprintln!("No clickhouse/postgres pods found; nothing to do.");
        return Ok(1);
    }

    let results = match Kubectl::ensure_available() {
        Ok(()) => {
            let kubectl = Kubectl::new(cfg.context.clone());
            let exec = LoggedExec::new(&kubectl, run_log);
            let viewer = viewer::select(cli.no_pager, cli.json, &cfg.pager);
            let sleeper = ThreadSleeper;
            let dispatcher = Dispatcher::new(&exec, viewer.as_ref(), cfg, run_log, &sleeper)
                .reports_to(viewer::report_term(cli.json));
            dispatcher.run_all(command, &targets)
        }
        Err(e) => targets
            .iter()
            .map(|target| {
                let err = AdminError::RemoteExec {
                    pod: target.to_string(),
                    detail: format!("{e:#}"),
                };
                let result = ExecutionResult::new(target.clone(), Outcome::Failed, err.to_string());
                run_log.record_result(&result);
                result
            })
            .collect(),
    };

    report::print_summary(&results);
    if cli.json {
        report::print_json(&results)?;
    }
    Ok(types::aggregate_exit_code(&results))
}
