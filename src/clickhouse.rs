//! ClickHouse command lines, report queries and result parsing.
//!
//! Everything here runs inside the pod through `clickhouse-client` or the
//! HTTP interface on localhost, so nothing talks to ClickHouse directly.

use secrecy::{ExposeSecret, Secret};

use crate::config::ClickHouseConfig;
use crate::kubectl::sh_quote;

/// Pattern used by `crashlog` on every engine.
pub const CRASH_PATTERN: &str = "fatal|panic|error|exception|segfault|terminate";
pub const CRASH_CONTEXT_BEFORE: &str = "5";
pub const CRASH_CONTEXT_AFTER: &str = "20";

/// Catalog tables `healthcheck` expects to exist.
pub const SYSTEM_TABLES: &[&str] = &["tables", "parts", "replicas"];

pub const PING_OK: &str = "Ok.";

pub const PROBE_QUERY: &str = "SELECT 1";

pub const SCHEMA_QUERY: &str = "SELECT database, name, engine, \
    formatReadableSize(total_bytes) AS size, total_rows AS rows, \
    partition_key, sorting_key \
    FROM system.tables \
    WHERE database NOT IN ('system', 'INFORMATION_SCHEMA', 'information_schema') \
    AND NOT is_temporary \
    ORDER BY database, name";

pub const DATA_QUERY: &str = "SELECT database, table, \
    formatReadableSize(sum(bytes_on_disk)) AS size, sum(rows) AS rows, \
    count() AS parts, max(modification_time) AS last_modified \
    FROM system.parts \
    WHERE active \
    GROUP BY database, table \
    ORDER BY database, table";

pub const REPLICA_ISSUES_QUERY: &str = "SELECT database, table, is_readonly, \
    is_session_expired, active_replicas, total_replicas \
    FROM system.replicas \
    WHERE is_readonly OR is_session_expired OR active_replicas < total_replicas \
    ORDER BY database, table";

/// Grants held by `principal`. The principal is validated as an identifier at config load.
pub fn grants_query(principal: &str) -> String {
    format!(
        "SELECT user_name, role_name, access_type, database, table, column, is_partial_revoke, grant_option \
         FROM system.grants \
         WHERE user_name = '{principal}' OR role_name = '{principal}' \
         ORDER BY database, table, access_type"
    )
}

pub fn exists_query(table: &str) -> String {
    format!("EXISTS TABLE system.{table}")
}

/// Reads the password line from stdin into the variable `clickhouse-client`
/// picks up, then execs the client with the remaining arguments.
const PASSWORD_FROM_STDIN: &str =
    "IFS= read -r CLICKHOUSE_PASSWORD && export CLICKHOUSE_PASSWORD && exec \"$0\" \"$@\"";

/// A captured `clickhouse-client` call. The password, when set, travels on
/// stdin so it never shows up in the local process list.
pub struct ClientCommand {
    pub argv: Vec<String>,
    pub password: Option<Secret<String>>,
}

/// Builds `clickhouse-client` invocations with the configured principal.
pub struct ClickHouseClient<'a> {
    cfg: &'a ClickHouseConfig,
}

impl<'a> ClickHouseClient<'a> {
    pub fn new(cfg: &'a ClickHouseConfig) -> Self {
        Self { cfg }
    }

    /// Interactive client session. The terminal owns stdin here, so the
    /// password has to go on the command line.
    pub fn session_args(&self) -> Vec<String> {
        let mut args = vec![
            "clickhouse-client".to_string(),
            "--user".to_string(),
            self.cfg.user.clone(),
        ];
        let password = self.cfg.password.expose_secret();
        if !password.is_empty() {
            args.push("--password".to_string());
            args.push(password.clone());
        }
        args
    }

    /// One-shot query returning tab separated output with a header row.
    pub fn query_args(&self, sql: &str) -> ClientCommand {
        self.captured(sql, "TabSeparatedWithNames")
    }

    /// Scalar query, plain tab separated output without header.
    pub fn scalar_args(&self, sql: &str) -> ClientCommand {
        self.captured(sql, "TabSeparated")
    }

    fn captured(&self, sql: &str, format: &str) -> ClientCommand {
        let password = self.cfg.password.expose_secret();
        let mut argv = Vec::with_capacity(10);
        if !password.is_empty() {
            argv.extend(["sh".to_string(), "-c".to_string(), PASSWORD_FROM_STDIN.to_string()]);
        }
        argv.extend([
            "clickhouse-client".to_string(),
            "--user".to_string(),
            self.cfg.user.clone(),
            "--query".to_string(),
            sql.to_string(),
            "--format".to_string(),
            format.to_string(),
        ]);
        ClientCommand {
            argv,
            password: (!password.is_empty()).then(|| Secret::new(password.clone())),
        }
    }

    /// HTTP ping against the local server, with `wget` as fallback when `curl` is absent.
    pub fn ping_args(&self) -> Vec<String> {
        let url = sh_quote(&format!("http://localhost:{}/ping", self.cfg.http_port));
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "if command -v curl >/dev/null 2>&1; then curl -sS {url}; else wget -qO- {url}; fi"
            ),
        ]
    }

    pub fn log_args(&self) -> Vec<String> {
        vec!["cat".to_string(), format!("{}/clickhouse-server.log", self.cfg.log_dir)]
    }

    /// Files `crashlog` greps, in order. `grep` prefixes each output line with one of them.
    pub fn crash_log_files(&self) -> Vec<String> {
        vec![
            format!("{}/clickhouse-server.err.log", self.cfg.log_dir),
            format!("{}/clickhouse-server.log", self.cfg.log_dir),
        ]
    }

    /// Crash excerpts from the error log and the main log.
    pub fn crash_log_args(&self) -> Vec<String> {
        let mut args = vec![
            "grep".to_string(),
            "-n".to_string(),
            "-i".to_string(),
            "-E".to_string(),
            CRASH_PATTERN.to_string(),
            "-B".to_string(),
            CRASH_CONTEXT_BEFORE.to_string(),
            "-A".to_string(),
            CRASH_CONTEXT_AFTER.to_string(),
        ];
        args.extend(self.crash_log_files());
        args
    }
}

/// Whether the ping body is exactly the server's success literal.
/// Only the trailing newline the server appends is ignored.
pub fn ping_ok(body: &str) -> bool {
    body.strip_suffix('\n').unwrap_or(body) == PING_OK
}

/// A parsed `TabSeparatedWithNames` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TsvTable {
    pub fn parse(output: &str) -> Self {
        let mut lines = output.lines().filter(|l| !l.is_empty());
        let header = lines.next().map(split_tsv_line).unwrap_or_default();
        let rows = lines.map(split_tsv_line).collect();
        Self { header, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as an aligned text table.
    pub fn render(&self) -> String {
        let cols = self.header.len();
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate().take(cols) {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let fmt_row = |cells: &[String]| -> String {
            cells
                .iter()
                .enumerate()
                .take(cols)
                .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = String::new();
        out.push_str(&fmt_row(&self.header));
        out.push('\n');
        let total: usize = widths.iter().sum::<usize>() + 2 * cols.saturating_sub(1);
        out.push_str(&"-".repeat(total));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&fmt_row(row));
            out.push('\n');
        }
        out
    }
}

fn split_tsv_line(line: &str) -> Vec<String> {
    line.split('\t').map(unescape_tsv).collect()
}

fn unescape_tsv(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some('N') => out.push_str("NULL"),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn cfg(password: &str) -> ClickHouseConfig {
        ClickHouseConfig {
            password: Secret::new(password.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_session_args_omit_empty_password() {
        let c = cfg("");
        assert_eq!(ClickHouseClient::new(&c).session_args(), vec!["clickhouse-client", "--user", "default"]);

        let c = cfg("pw");
        assert_eq!(
            ClickHouseClient::new(&c).session_args(),
            vec!["clickhouse-client", "--user", "default", "--password", "pw"]
        );
    }

    #[test]
    fn test_query_args_use_tsv_with_names() {
        let c = cfg("");
        let cmd = ClickHouseClient::new(&c).query_args(PROBE_QUERY);
        assert_eq!(&cmd.argv[3..], &["--query", "SELECT 1", "--format", "TabSeparatedWithNames"]);
        assert!(cmd.password.is_none());
    }

    #[test]
    fn test_captured_queries_keep_password_off_argv() {
        let c = cfg("hunter2");
        let cmd = ClickHouseClient::new(&c).scalar_args(PROBE_QUERY);
        assert!(cmd.argv.iter().all(|a| !a.contains("hunter2")));
        assert!(!cmd.argv.iter().any(|a| a == "--password"));
        assert_eq!(&cmd.argv[..3], &["sh", "-c", PASSWORD_FROM_STDIN]);
        assert_eq!(&cmd.argv[3..6], &["clickhouse-client", "--user", "default"]);
        assert_eq!(cmd.password.unwrap().expose_secret(), "hunter2");
    }

    #[test]
    fn test_crash_log_greps_both_files() {
        let c = cfg("");
        let client = ClickHouseClient::new(&c);
        let args = client.crash_log_args();
        assert_eq!(&args[args.len() - 2..], client.crash_log_files().as_slice());
        assert!(args[9].ends_with("clickhouse-server.err.log"));
    }

    #[test]
    fn test_ping_literal_is_exact() {
        assert!(ping_ok("Ok.\n"));
        assert!(ping_ok("Ok."));
        assert!(!ping_ok("ok."));
        assert!(!ping_ok("Ok"));
        assert!(!ping_ok(" Ok.\n"));
        assert!(!ping_ok(""));
    }

    #[test]
    fn test_ping_uses_configured_port() {
        let mut c = cfg("");
        c.http_port = 18123;
        let args = ClickHouseClient::new(&c).ping_args();
        assert!(args[2].contains("'http://localhost:18123/ping'"));
    }

    #[test]
    fn test_grants_query_targets_principal() {
        let q = grants_query("viewer");
        assert!(q.contains("user_name = 'viewer'"));
        assert!(q.contains("system.grants"));
    }

    #[test]
    fn test_parse_tsv_table() {
        let table = TsvTable::parse("database\tname\trows\ndefault\tevents\t42\nlogs\ta\\tb\t\\N\n");
        assert_eq!(table.header, vec!["database", "name", "rows"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["logs", "a\tb", "NULL"]);
        assert!(!table.is_empty());
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(TsvTable::parse("database\ttable\n").is_empty());
        assert!(TsvTable::parse("").is_empty());
    }

    #[test]
    fn test_render_aligns_columns() {
        let table = TsvTable::parse("db\ttable\ndefault\te\n");
        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "db       table");
        assert_eq!(lines[1], "--------------");
        assert_eq!(lines[2], "default  e");
    }
}
