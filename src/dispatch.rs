use console::{Style, Term};
use regex::Regex;
use secrecy::ExposeSecret;

use crate::clickhouse::{self, ClickHouseClient, ClientCommand, TsvTable};
use crate::config::Config;
use crate::error::AdminError;
use crate::exec::ExecResult;
use crate::kubectl::{PodExec, sh_quote};
use crate::pods::{EngineKind, PodTarget};
use crate::postgres::PostgresClient;
use crate::progress::{finish_spinner, stage_spinner};
use crate::retry::Sleeper;
use crate::runlog::RunLog;
use crate::types::{Command, ExecutionResult, Outcome};
use crate::viewer::Viewer;

/// Exit code the install script uses when neither apt-get nor yum exists.
const UNSUPPORTED_PM_EXIT: i32 = 3;

/// Runs one admin command against resolved pods, one pod at a time.
pub struct Dispatcher<'a> {
    exec: &'a dyn PodExec,
    viewer: &'a dyn Viewer,
    config: &'a Config,
    run_log: &'a RunLog,
    sleeper: &'a dyn Sleeper,
    report: Term,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        exec: &'a dyn PodExec,
        viewer: &'a dyn Viewer,
        config: &'a Config,
        run_log: &'a RunLog,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            exec,
            viewer,
            config,
            run_log,
            sleeper,
            report: Term::stdout(),
        }
    }

    /// Send report tables to `term` instead of stdout.
    pub fn reports_to(mut self, term: Term) -> Self {
        self.report = term;
        self
    }

    /// Run `command` on every target in order. A failing target never stops the rest.
    pub fn run_all(&self, command: Command, targets: &[PodTarget]) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            if targets.len() > 1 {
                eprintln!(
                    "\n[{}/{}] {} on {} ({})",
                    i + 1,
                    targets.len(),
                    command,
                    target,
                    target.engine
                );
            }
            results.push(self.run(command, target));
        }
        results
    }

    pub fn run(&self, command: Command, target: &PodTarget) -> ExecutionResult {
        tracing::debug!(%command, pod = %target, engine = %target.engine, "dispatching");
        let result = match self.perform(command, target) {
            Ok(message) => ExecutionResult::new(target.clone(), Outcome::Ok, message),
            Err(e) if e.is_degraded() => {
                let yellow = Style::new().yellow().bold();
                eprintln!("  {} {}", yellow.apply_to("WARN"), e);
                ExecutionResult::new(target.clone(), Outcome::Degraded, e.to_string())
            }
            Err(e) => {
                let red = Style::new().red().bold();
                eprintln!("  {} {}", red.apply_to("FAIL"), e);
                ExecutionResult::new(target.clone(), Outcome::Failed, e.to_string())
            }
        };
        self.run_log.record_result(&result);
        result
    }

    fn perform(&self, command: Command, pod: &PodTarget) -> Result<String, AdminError> {
        // Engine-specific checks are refused before anything touches the cluster.
        if command.clickhouse_only() && pod.engine != EngineKind::ClickHouse {
            return Err(unsupported(command, pod));
        }

        match command {
            Command::InstallTools => self.install_tools(pod),
            Command::Sql => self.sql(pod),
            Command::Log => self.log(pod),
            Command::CrashLog => self.crash_log(pod),
            Command::SchemaCheck => self.report(command, pod, clickhouse::SCHEMA_QUERY),
            Command::DataCheck => self.report(command, pod, clickhouse::DATA_QUERY),
            Command::GrantCheck => {
                let query = clickhouse::grants_query(&self.config.clickhouse.viewer_principal);
                self.report(command, pod, &query)
            }
            Command::HealthCheck => self.health_check(pod),
        }
    }

    fn remote(&self, pod: &PodTarget, args: &[String]) -> Result<ExecResult, AdminError> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec.exec(pod, &argv).map_err(|e| AdminError::RemoteExec {
            pod: pod.to_string(),
            detail: format!("{e:#}"),
        })
    }

    fn client(&self, pod: &PodTarget, command: &ClientCommand) -> Result<ExecResult, AdminError> {
        let Some(password) = &command.password else {
            return self.remote(pod, &command.argv);
        };
        let argv: Vec<&str> = command.argv.iter().map(String::as_str).collect();
        let input = format!("{}\n", password.expose_secret());
        self.exec
            .exec_with_input(pod, &argv, &input)
            .map_err(|e| AdminError::RemoteExec {
                pod: pod.to_string(),
                detail: format!("{e:#}"),
            })
    }

    fn write_report(&self, text: &str) -> Result<(), AdminError> {
        self.report
            .write_str(text)
            .map_err(|e| AdminError::Output(format!("failed to write report: {e}")))
    }

    fn clickhouse(&self) -> ClickHouseClient<'_> {
        ClickHouseClient::new(&self.config.clickhouse)
    }

    fn postgres(&self) -> PostgresClient<'_> {
        PostgresClient::new(&self.config.postgres)
    }

    fn install_tools(&self, pod: &PodTarget) -> Result<String, AdminError> {
        let packages = &self.config.tools.packages;
        let script = install_script(packages);
        let result = self.remote(pod, &["sh".to_string(), "-c".to_string(), script])?;

        if result.exit_code == UNSUPPORTED_PM_EXIT {
            return Err(AdminError::RemoteExec {
                pod: pod.to_string(),
                detail: "unsupported package manager (need apt-get or yum)".to_string(),
            });
        }
        if !result.success() {
            // Surface the package manager's own output.
            eprint!("{}", result.stdout);
            eprint!("{}", result.stderr);
            return Err(remote_failure(pod, &result));
        }

        let manager = result
            .stdout
            .lines()
            .find_map(|l| l.strip_prefix("package manager: "))
            .unwrap_or("package manager")
            .to_string();
        Ok(format!("installed {} via {}", packages.join(", "), manager))
    }

    fn sql(&self, pod: &PodTarget) -> Result<String, AdminError> {
        let args = match pod.engine {
            EngineKind::ClickHouse => self.clickhouse().session_args(),
            EngineKind::PostgreSQL => self.postgres().session_args(),
            EngineKind::Unknown => return Err(unsupported(Command::Sql, pod)),
        };
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let code = self
            .exec
            .exec_attached(pod, &argv, self.viewer.interactive())
            .map_err(|e| AdminError::RemoteExec {
                pod: pod.to_string(),
                detail: format!("{e:#}"),
            })?;

        if code != 0 {
            return Err(AdminError::RemoteExec {
                pod: pod.to_string(),
                detail: format!("{} session exited with code {}", pod.engine, code),
            });
        }
        Ok(format!("{} session closed", pod.engine))
    }

    fn log(&self, pod: &PodTarget) -> Result<String, AdminError> {
        let args = match pod.engine {
            EngineKind::ClickHouse => self.clickhouse().log_args(),
            EngineKind::PostgreSQL => self.postgres().log_args(),
            EngineKind::Unknown => return Err(unsupported(Command::Log, pod)),
        };
        if let Some(pager) = self.viewer.pager() {
            return self.stream_log(pod, &args, pager);
        }

        let result = self.remote(pod, &args)?;
        if !result.success() {
            return Err(remote_failure(pod, &result));
        }
        if result.stdout.is_empty() {
            return Ok("log is empty".to_string());
        }

        self.show(pod, "log", &result.stdout)?;
        Ok(format!("{} log lines", result.stdout.lines().count()))
    }

    /// Log files can be gigabytes; the remote `cat` feeds the pager directly.
    fn stream_log(&self, pod: &PodTarget, args: &[String], pager: &str) -> Result<String, AdminError> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = self
            .exec
            .exec_paged(pod, &argv, pager)
            .map_err(|e| AdminError::RemoteExec {
                pod: pod.to_string(),
                detail: format!("{e:#}"),
            })?;

        if result.pager_exit_code != 0 {
            return Err(AdminError::Output(format!(
                "pager '{}' exited with code {}",
                pager, result.pager_exit_code
            )));
        }
        if result.truncated {
            return Ok("log viewed (pager closed early)".to_string());
        }
        if result.exit_code != 0 {
            return Err(AdminError::RemoteExec {
                pod: pod.to_string(),
                detail: first_line(&result.stderr, result.exit_code),
            });
        }
        Ok("log viewed".to_string())
    }

    fn crash_log(&self, pod: &PodTarget) -> Result<String, AdminError> {
        // Multi-file greps prefix every line with its file name.
        let (args, files) = match pod.engine {
            EngineKind::ClickHouse => {
                let ch = self.clickhouse();
                (ch.crash_log_args(), ch.crash_log_files())
            }
            EngineKind::PostgreSQL => (self.postgres().crash_log_args(), Vec::new()),
            EngineKind::Unknown => return Err(unsupported(Command::CrashLog, pod)),
        };
        let result = self.remote(pod, &args)?;

        // grep exits 1 on no match and 2 when a file is unreadable; partial output still counts.
        if result.stdout.trim().is_empty() {
            return match result.exit_code {
                0 | 1 => Ok("no crash markers found".to_string()),
                _ => Err(remote_failure(pod, &result)),
            };
        }
        if result.exit_code > 1 {
            tracing::warn!(pod = %pod, stderr = %result.stderr.trim(), "crash log partially read");
        }

        self.show(pod, "crash log", &result.stdout)?;
        let matches = count_match_lines(&result.stdout, &files);
        Ok(format!("{matches} matching lines"))
    }

    fn show(&self, pod: &PodTarget, what: &str, text: &str) -> Result<(), AdminError> {
        let title = format!("{pod} {what}");
        self.run_log.record_output(pod, what, text);
        self.viewer
            .show(&title, text)
            .map_err(|e| AdminError::Output(format!("{e:#}")))
    }

    /// Probe the client protocol with `SELECT 1` under the configured retry policy.
    /// Returns the number of attempts it took.
    pub fn wait_for_connectivity(&self, pod: &PodTarget) -> Result<u32, AdminError> {
        let policy = self.config.retry.policy();
        let probe = self.clickhouse().scalar_args(clickhouse::PROBE_QUERY);
        let pb = stage_spinner(&format!("Connecting to {pod}..."));

        let result = policy.run(
            &mut |delay| self.sleeper.sleep(delay),
            |attempt| {
                pb.set_message(format!(
                    "Connecting to {} (attempt {}/{})...",
                    pod, attempt, policy.max_attempts
                ));
                match self.client(pod, &probe) {
                    Ok(r) if r.success() && r.stdout.trim() == "1" => Ok(attempt),
                    Ok(r) if !r.success() => Err(first_line(&r.stderr, r.exit_code)),
                    Ok(r) => Err(format!("unexpected probe output: {}", r.stdout.trim())),
                    Err(e) => Err(e.to_string()),
                }
            },
        );

        finish_spinner(&pb, result.is_ok());
        result.map_err(|e| AdminError::Connectivity {
            pod: pod.to_string(),
            attempts: e.attempts,
            last_error: e.last_error,
        })
    }

    fn report(&self, command: Command, pod: &PodTarget, query: &str) -> Result<String, AdminError> {
        let attempts = self.wait_for_connectivity(pod)?;
        tracing::debug!(pod = %pod, attempts, "connectivity confirmed");

        let result = self.client(pod, &self.clickhouse().query_args(query))?;
        if !result.success() {
            return Err(remote_failure(pod, &result));
        }

        let table = TsvTable::parse(&result.stdout);
        if table.is_empty() {
            return Err(AdminError::EmptyResult {
                check: command.to_string(),
                pod: pod.to_string(),
            });
        }

        self.write_report(&format!("\n{command} on {pod}:\n{}", table.render()))?;
        Ok(format!("{} rows", table.rows.len()))
    }

    fn health_check(&self, pod: &PodTarget) -> Result<String, AdminError> {
        let ch = self.clickhouse();
        let fail = |step: &'static str, detail: String| AdminError::HealthCheck {
            pod: pod.to_string(),
            step,
            detail,
        };

        // 1. HTTP ping must answer the exact literal.
        let pb = stage_spinner("Step 1/4: HTTP ping");
        let ping = self.remote(pod, &ch.ping_args());
        let ping_passed = matches!(&ping, Ok(r) if r.success() && clickhouse::ping_ok(&r.stdout));
        finish_spinner(&pb, ping_passed);
        let ping = ping?;
        if !ping_passed {
            let body = if ping.stdout.is_empty() { ping.stderr.trim() } else { ping.stdout.trim() };
            return Err(fail(
                "HTTP ping",
                format!("expected '{}', got '{}'", clickhouse::PING_OK, body),
            ));
        }

        // 2. Trivial query over the client protocol.
        let pb = stage_spinner("Step 2/4: client query");
        let probe = self.client(pod, &ch.scalar_args(clickhouse::PROBE_QUERY));
        let probe_passed = matches!(&probe, Ok(r) if r.success() && r.stdout.trim() == "1");
        finish_spinner(&pb, probe_passed);
        let probe = probe?;
        if !probe_passed {
            return Err(fail("client query", first_line(&probe.stderr, probe.exit_code)));
        }

        // 3. System catalog tables; every table is checked before failing.
        let pb = stage_spinner("Step 3/4: system tables");
        let mut missing = Vec::new();
        for table in clickhouse::SYSTEM_TABLES {
            match self.client(pod, &ch.scalar_args(&clickhouse::exists_query(table))) {
                Ok(r) if r.success() && r.stdout.trim() == "1" => {}
                Ok(_) => missing.push(format!("system.{table}")),
                Err(e) => {
                    tracing::debug!(pod = %pod, table, error = %e, "exists check failed");
                    missing.push(format!("system.{table}"));
                }
            }
        }
        finish_spinner(&pb, missing.is_empty());
        if !missing.is_empty() {
            return Err(fail(
                "system tables",
                format!(
                    "{} of {} missing: {}",
                    missing.len(),
                    clickhouse::SYSTEM_TABLES.len(),
                    missing.join(", ")
                ),
            ));
        }

        // 4. No inactive or read-only replicas.
        let pb = stage_spinner("Step 4/4: replica status");
        let replicas = self.client(pod, &ch.query_args(clickhouse::REPLICA_ISSUES_QUERY));
        let replicas = match replicas {
            Ok(r) => r,
            Err(e) => {
                finish_spinner(&pb, false);
                return Err(e);
            }
        };
        if !replicas.success() {
            finish_spinner(&pb, false);
            return Err(fail("replica status", first_line(&replicas.stderr, replicas.exit_code)));
        }
        let issues = TsvTable::parse(&replicas.stdout);
        finish_spinner(&pb, issues.is_empty());
        if !issues.is_empty() {
            self.write_report(&issues.render())?;
            return Err(fail(
                "replica status",
                format!("{} replicas inactive or read-only", issues.rows.len()),
            ));
        }

        Ok("all 4 health steps passed".to_string())
    }
}

/// Shell script installing `packages` with whichever of apt-get or yum exists.
fn install_script(packages: &[String]) -> String {
    let pkgs = packages
        .iter()
        .map(|p| sh_quote(p))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "if command -v apt-get >/dev/null 2>&1; then \
           echo 'package manager: apt-get'; \
           apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {pkgs}; \
         elif command -v yum >/dev/null 2>&1; then \
           echo 'package manager: yum'; \
           yum install -y -q {pkgs}; \
         else \
           echo 'unsupported package manager' >&2; exit {UNSUPPORTED_PM_EXIT}; \
         fi"
    )
}

fn unsupported(command: Command, pod: &PodTarget) -> AdminError {
    AdminError::UnsupportedTarget {
        command: command.to_string(),
        pod: pod.to_string(),
        engine: pod.engine,
    }
}

fn remote_failure(pod: &PodTarget, result: &ExecResult) -> AdminError {
    AdminError::RemoteExec {
        pod: pod.to_string(),
        detail: first_line(&result.stderr, result.exit_code),
    }
}

/// Verbatim stderr (trimmed), or the exit code when stderr is empty.
fn first_line(stderr: &str, exit_code: i32) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exit code {exit_code}")
    } else {
        stderr.to_string()
    }
}

/// Count match lines in `grep -n` output. Matches read `N:` and context lines
/// `N-`; with several `files` each line starts with the file name first.
/// Timestamps in log text contain both separators, so only the prefix is inspected.
fn count_match_lines(output: &str, files: &[String]) -> usize {
    let line_number = Regex::new(r"^\d+:").expect("Invalid regex");
    output
        .lines()
        .filter(|line| {
            let rest = if files.is_empty() {
                Some(*line)
            } else {
                files
                    .iter()
                    .find_map(|f| line.strip_prefix(f.as_str()).and_then(|r| r.strip_prefix(':')))
            };
            rest.is_some_and(|r| line_number.is_match(r))
        })
        .count()
}
