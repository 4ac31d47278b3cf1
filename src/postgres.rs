use crate::clickhouse::{CRASH_CONTEXT_AFTER, CRASH_CONTEXT_BEFORE, CRASH_PATTERN};
use crate::config::PostgresConfig;
use crate::kubectl::sh_quote;

/// Builds `psql` and log-reading invocations for PostgreSQL pods.
pub struct PostgresClient<'a> {
    cfg: &'a PostgresConfig,
}

impl<'a> PostgresClient<'a> {
    pub fn new(cfg: &'a PostgresConfig) -> Self {
        Self { cfg }
    }

    pub fn session_args(&self) -> Vec<String> {
        vec![
            "psql".to_string(),
            "-U".to_string(),
            self.cfg.user.clone(),
            "-d".to_string(),
            self.cfg.database.clone(),
        ]
    }

    /// Full contents of the most recently modified log file.
    pub fn log_args(&self) -> Vec<String> {
        self.latest_log_script("cat \"$f\"")
    }

    pub fn crash_log_args(&self) -> Vec<String> {
        self.latest_log_script(&format!(
            "grep -n -i -E {} -B {} -A {} \"$f\"",
            sh_quote(CRASH_PATTERN),
            CRASH_CONTEXT_BEFORE,
            CRASH_CONTEXT_AFTER
        ))
    }

    // PostgreSQL rotates into many files; `ls -t` puts the newest first.
    fn latest_log_script(&self, reader: &str) -> Vec<String> {
        let dir = sh_quote(&self.cfg.log_dir);
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "f=$(ls -t {dir}/* 2>/dev/null | head -n 1); \
                 if [ -z \"$f\" ]; then echo \"no log files in \"{dir} >&2; exit 2; fi; \
                 {reader}"
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_args() {
        let cfg = PostgresConfig::default();
        assert_eq!(PostgresClient::new(&cfg).session_args(), vec!["psql", "-U", "postgres", "-d", "postgres"]);
    }

    #[test]
    fn test_log_script_reads_newest_file() {
        let cfg = PostgresConfig {
            log_dir: "/pg data/log".to_string(),
            ..Default::default()
        };
        let args = PostgresClient::new(&cfg).log_args();
        assert_eq!(args[0], "sh");
        assert!(args[2].contains("ls -t '/pg data/log'/*"));
        assert!(args[2].ends_with("cat \"$f\""));
    }

    #[test]
    fn test_crash_script_greps_newest_file() {
        let cfg = PostgresConfig::default();
        let args = PostgresClient::new(&cfg).crash_log_args();
        assert!(args[2].contains("grep -n -i -E 'fatal|panic|error|exception|segfault|terminate' -B 5 -A 20 \"$f\""));
    }
}
